//! 事件分发器
//!
//! 调用方用 [`ListenerTable`] 声明“哪个监听器关心哪个任务”，分发器只保存弱引用，
//! 监听器被释放后自动失效。分发器运行在独立的 Arbiter 线程上，回调再慢也不会拖住下载。

use actix::prelude::*;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::core::error::DownloadError;
use crate::core::task::model::{EventKind, TaskEvent, TaskId};
use crate::core::task::state::TaskStatus;

/// 任务事件监听器，所有回调默认什么都不做
pub trait TaskListener: Send + Sync + 'static {
    /// 每次状态迁移
    fn on_state_changed(&self, _event: &TaskEvent) {}
    fn on_progress(&self, _event: &TaskEvent) {}
    fn on_success(&self, _event: &TaskEvent) {}
    fn on_error(&self, _event: &TaskEvent, _error: &DownloadError) {}
    fn on_cancel(&self, _event: &TaskEvent) {}
}

/// 观察者注册号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ObserverId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskFilter {
    All,
    Task(TaskId),
}

/// 调用方构造的注册表：过滤条件 → 监听器
#[derive(Default)]
pub struct ListenerTable {
    bindings: Vec<(TaskFilter, Weak<dyn TaskListener>)>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<L: TaskListener>(self, filter: TaskFilter, listener: &Arc<L>) -> Self {
        let listener: Arc<dyn TaskListener> = listener.clone();
        self.bind_dyn(filter, &listener)
    }

    pub fn bind_dyn(mut self, filter: TaskFilter, listener: &Arc<dyn TaskListener>) -> Self {
        self.bindings.push((filter, Arc::downgrade(listener)));
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

enum ListenerRef {
    Weak(Weak<dyn TaskListener>),
    /// 任务自带的监听器，随任务销毁而注销
    Owned(Arc<dyn TaskListener>),
}

impl ListenerRef {
    fn upgrade(&self) -> Option<Arc<dyn TaskListener>> {
        match self {
            ListenerRef::Weak(weak) => weak.upgrade(),
            ListenerRef::Owned(strong) => Some(strong.clone()),
        }
    }
}

struct Binding {
    observer: ObserverId,
    listener: ListenerRef,
}

/// 注册一组弱引用绑定
pub struct Register {
    pub observer: ObserverId,
    pub table: ListenerTable,
}
impl Message for Register { type Result = (); }

/// 注册任务自带的监听器（强引用）
pub struct RegisterOwned {
    pub observer: ObserverId,
    pub task_id: TaskId,
    pub listener: Arc<dyn TaskListener>,
}
impl Message for RegisterOwned { type Result = (); }

pub struct Unregister {
    pub observer: ObserverId,
}
impl Message for Unregister { type Result = (); }

/// 在此之前投递的事件全部分发完毕后返回
pub struct Flush;
impl Message for Flush { type Result = (); }

/// 当前仍然有效的绑定数
pub struct ObserverCount;
impl Message for ObserverCount { type Result = usize; }

#[derive(Default)]
pub struct EventDispatcher {
    bindings: HashMap<TaskFilter, Vec<Binding>>,
}

impl Actor for EventDispatcher {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        log::debug!("事件分发器已启动");
    }
}

impl EventDispatcher {
    /// 在新的 Arbiter 线程上启动分发器
    pub fn start_dedicated() -> (Addr<EventDispatcher>, Arbiter) {
        let arbiter = Arbiter::new();
        let addr = EventDispatcher::start_in_arbiter(&arbiter.handle(), |_| EventDispatcher::default());
        (addr, arbiter)
    }

    fn add(&mut self, filter: TaskFilter, binding: Binding) {
        self.bindings.entry(filter).or_default().push(binding);
    }

    fn live_listeners(&mut self, filter: TaskFilter) -> Vec<Arc<dyn TaskListener>> {
        let Some(bindings) = self.bindings.get_mut(&filter) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(bindings.len());
        bindings.retain(|binding| match binding.listener.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => {
                log::debug!("观察者 {:?} 已释放，移除绑定", binding.observer);
                false
            }
        });
        if bindings.is_empty() {
            self.bindings.remove(&filter);
        }
        live
    }

    fn deliver(listener: &dyn TaskListener, event: &TaskEvent) {
        match event.kind {
            EventKind::Progress => listener.on_progress(event),
            EventKind::StateChanged => {
                listener.on_state_changed(event);
                match event.state {
                    TaskStatus::Succeeded => listener.on_success(event),
                    TaskStatus::Cancelled => listener.on_cancel(event),
                    TaskStatus::Failed => {
                        if let Some(error) = &event.error {
                            listener.on_error(event, error);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

impl Handler<Register> for EventDispatcher {
    type Result = ();

    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) {
        for (filter, weak) in msg.table.bindings {
            self.add(
                filter,
                Binding {
                    observer: msg.observer,
                    listener: ListenerRef::Weak(weak),
                },
            );
        }
    }
}

impl Handler<RegisterOwned> for EventDispatcher {
    type Result = ();

    fn handle(&mut self, msg: RegisterOwned, _ctx: &mut Self::Context) {
        self.add(
            TaskFilter::Task(msg.task_id),
            Binding {
                observer: msg.observer,
                listener: ListenerRef::Owned(msg.listener),
            },
        );
    }
}

impl Handler<Unregister> for EventDispatcher {
    type Result = ();

    fn handle(&mut self, msg: Unregister, _ctx: &mut Self::Context) {
        self.bindings.retain(|_, bindings| {
            bindings.retain(|binding| binding.observer != msg.observer);
            !bindings.is_empty()
        });
    }
}

impl Handler<TaskEvent> for EventDispatcher {
    type Result = ();

    fn handle(&mut self, event: TaskEvent, _ctx: &mut Self::Context) {
        let mut listeners = self.live_listeners(TaskFilter::Task(event.id));
        listeners.extend(self.live_listeners(TaskFilter::All));

        for listener in listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                EventDispatcher::deliver(listener.as_ref(), &event)
            }));
            if result.is_err() {
                log::error!("观察者处理任务 {} 的事件时 panic，已忽略", event.id);
            }
        }
    }
}

impl Handler<Flush> for EventDispatcher {
    type Result = ();

    fn handle(&mut self, _msg: Flush, _ctx: &mut Self::Context) {}
}

impl Handler<ObserverCount> for EventDispatcher {
    type Result = usize;

    fn handle(&mut self, _msg: ObserverCount, _ctx: &mut Self::Context) -> usize {
        self.bindings
            .values()
            .flatten()
            .filter(|binding| binding.listener.upgrade().is_some())
            .count()
    }
}
