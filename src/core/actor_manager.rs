use actix::prelude::*;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DownloadOptions;
use crate::core::breakpoint::SharedStore;
use crate::core::dispatcher::{EventDispatcher, ObserverId, RegisterOwned, TaskListener, Unregister};
use crate::core::http::SharedTransport;
use crate::core::task::executor::EventSink;
use crate::core::task::{
    CancelTask, DownloadTaskActor, EventKind, PauseTask, ResumeTask, StartTask, TaskEvent, TaskHandle, TaskId,
    TaskIdentity, TaskStatus,
};

/// 提交下载任务；同一 (目标路径, URL) 的重复提交返回已有任务
pub struct SubmitTask {
    pub destination: PathBuf,
    pub url: String,
    pub listener: Option<Arc<dyn TaskListener>>,
}
impl Message for SubmitTask { type Result = TaskHandle; }

impl Handler<SubmitTask> for DownloadManagerActor {
    type Result = MessageResult<SubmitTask>;

    fn handle(&mut self, msg: SubmitTask, ctx: &mut Self::Context) -> Self::Result {
        let identity = TaskIdentity::new(msg.destination, msg.url);
        if let Some(entry) = self.tasks.get(&identity.id) {
            if entry.handle.state != TaskStatus::Failed {
                log::debug!("任务 {} 已存在，合并重复提交", identity.id);
                return MessageResult(entry.handle.clone());
            }
            log::info!("重新提交失败的任务 {}", identity.id);
            self.destroy(identity.id);
        }

        let handle = TaskHandle::new(&identity, self.next_seq);
        self.next_seq += 1;

        let observer = msg.listener.map(|listener| {
            let observer = ObserverId::next();
            self.dispatcher.do_send(RegisterOwned {
                observer,
                task_id: identity.id,
                listener,
            });
            observer
        });
        self.dispatcher
            .do_send(TaskEvent::state_changed(identity.id, TaskStatus::Pending));
        log::info!("提交任务 {}: {} -> {}", identity.id, identity.url, identity.destination.display());

        self.backlog.push_back(identity.id);
        self.tasks.insert(
            identity.id,
            TaskEntry {
                identity,
                handle: handle.clone(),
                actor: None,
                observer,
            },
        );
        self.promote(ctx);
        MessageResult(handle)
    }
}

/// 取消指定任务
pub struct CancelTaskById { pub task_id: TaskId }
impl Message for CancelTaskById { type Result = bool; }
impl Handler<CancelTaskById> for DownloadManagerActor {
    type Result = bool;

    fn handle(&mut self, msg: CancelTaskById, _ctx: &mut Self::Context) -> bool {
        let Some(entry) = self.tasks.get(&msg.task_id) else {
            return false;
        };
        if let Some(actor) = &entry.actor {
            actor.do_send(CancelTask);
            return true;
        }
        if entry.handle.state == TaskStatus::Pending {
            self.cancel_queued(msg.task_id);
            return true;
        }
        false
    }
}

/// 暂停指定任务
pub struct PauseTaskById { pub task_id: TaskId }
impl Message for PauseTaskById { type Result = bool; }
impl Handler<PauseTaskById> for DownloadManagerActor {
    type Result = ResponseFuture<bool>;

    fn handle(&mut self, msg: PauseTaskById, _ctx: &mut Self::Context) -> Self::Result {
        match self.tasks.get(&msg.task_id).and_then(|entry| entry.actor.clone()) {
            Some(actor) => Box::pin(async move { actor.send(PauseTask).await.unwrap_or(false) }),
            None => Box::pin(async { false }),
        }
    }
}

/// 恢复已暂停的任务；暂停期间槽位一直保留，不需要重新排队
pub struct ResumeTaskById { pub task_id: TaskId }
impl Message for ResumeTaskById { type Result = bool; }
impl Handler<ResumeTaskById> for DownloadManagerActor {
    type Result = ResponseFuture<bool>;

    fn handle(&mut self, msg: ResumeTaskById, _ctx: &mut Self::Context) -> Self::Result {
        match self.tasks.get(&msg.task_id).and_then(|entry| entry.actor.clone()) {
            Some(actor) => Box::pin(async move { actor.send(ResumeTask).await.unwrap_or(false) }),
            None => Box::pin(async { false }),
        }
    }
}

/// 移除指定任务，断点记录保留
///
/// 活动中的任务先取消，收到 CANCELLED 后再销毁
pub struct RemoveTaskById { pub task_id: TaskId }
impl Message for RemoveTaskById { type Result = bool; }
impl Handler<RemoveTaskById> for DownloadManagerActor {
    type Result = bool;

    fn handle(&mut self, msg: RemoveTaskById, _ctx: &mut Self::Context) -> bool {
        let Some(entry) = self.tasks.get(&msg.task_id) else {
            return false;
        };
        if let Some(actor) = &entry.actor {
            actor.do_send(CancelTask);
        } else if entry.handle.state == TaskStatus::Pending {
            self.cancel_queued(msg.task_id);
        } else {
            self.destroy(msg.task_id);
        }
        log::info!("移除任务 {}", msg.task_id);
        true
    }
}

/// 取消所有任务，等每个任务 Actor 释放文件句柄后才返回
pub struct ClearAll;
impl Message for ClearAll { type Result = (); }
impl Handler<ClearAll> for DownloadManagerActor {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _msg: ClearAll, _ctx: &mut Self::Context) -> Self::Result {
        let queued: Vec<TaskId> = self.backlog.iter().copied().collect();
        for id in queued {
            self.cancel_queued(id);
        }

        let mut active = Vec::new();
        let mut idle = Vec::new();
        for (id, entry) in &self.tasks {
            match &entry.actor {
                Some(actor) => active.push((*id, actor.send(CancelTask))),
                None => idle.push(*id),
            }
        }
        for id in idle {
            self.destroy(id);
        }
        log::info!("清空任务队列，等待 {} 个运行中的任务停止", active.len());

        let (ids, waits): (Vec<TaskId>, Vec<_>) = active.into_iter().unzip();
        Box::pin(join_all(waits).into_actor(self).map(move |_, act, ctx| {
            for id in ids {
                if act.release(id) {
                    act.destroy(id);
                }
            }
            act.promote(ctx);
        }))
    }
}

/// 所有任务快照，按提交顺序排列
pub struct SnapshotQueue;
impl Message for SnapshotQueue { type Result = Vec<TaskHandle>; }
impl Handler<SnapshotQueue> for DownloadManagerActor {
    type Result = MessageResult<SnapshotQueue>;

    fn handle(&mut self, _msg: SnapshotQueue, _ctx: &mut Self::Context) -> Self::Result {
        let mut handles: Vec<TaskHandle> = self.tasks.values().map(|entry| entry.handle.clone()).collect();
        handles.sort_by_key(|handle| handle.seq);
        MessageResult(handles)
    }
}

/// 查询指定任务快照
pub struct QueryTaskById { pub task_id: TaskId }
impl Message for QueryTaskById { type Result = Option<TaskHandle>; }
impl Handler<QueryTaskById> for DownloadManagerActor {
    type Result = Option<TaskHandle>;

    fn handle(&mut self, msg: QueryTaskById, _ctx: &mut Self::Context) -> Self::Result {
        self.tasks.get(&msg.task_id).map(|entry| entry.handle.clone())
    }
}

/// 任务 Actor 上报的事件：更新快照，终态时释放槽位
impl Handler<TaskEvent> for DownloadManagerActor {
    type Result = ();

    fn handle(&mut self, event: TaskEvent, ctx: &mut Self::Context) {
        let Some(entry) = self.tasks.get_mut(&event.id) else {
            return;
        };
        entry.handle.apply(&event);
        if event.kind != EventKind::StateChanged || !event.state.is_terminal() {
            return;
        }

        self.release(event.id);
        if event.state != TaskStatus::Failed {
            self.destroy(event.id);
        }
        self.promote(ctx);
    }
}

impl Actor for DownloadManagerActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        log::debug!("下载调度器已启动，并行任务上限 {}", self.options.parallel_task_count);
    }
}

struct TaskEntry {
    identity: TaskIdentity,
    handle: TaskHandle,
    /// 分配到槽位后才有
    actor: Option<Addr<DownloadTaskActor>>,
    /// 任务自带监听器的注册号
    observer: Option<ObserverId>,
}

/// 下载调度器 Actor
pub struct DownloadManagerActor {
    options: DownloadOptions,
    transport: SharedTransport,
    store: SharedStore,
    dispatcher: Addr<EventDispatcher>,
    tasks: HashMap<TaskId, TaskEntry>,
    backlog: VecDeque<TaskId>,
    running: usize,
    next_seq: u64,
}

impl DownloadManagerActor {
    pub fn new(
        options: DownloadOptions,
        transport: SharedTransport,
        store: SharedStore,
        dispatcher: Addr<EventDispatcher>,
    ) -> Self {
        Self {
            options,
            transport,
            store,
            dispatcher,
            tasks: HashMap::new(),
            backlog: VecDeque::new(),
            running: 0,
            next_seq: 0,
        }
    }

    /// 按提交顺序把排队的任务放进空闲槽位
    fn promote(&mut self, ctx: &mut Context<Self>) {
        while self.running < self.options.parallel_task_count {
            let Some(id) = self.backlog.pop_front() else {
                break;
            };
            let Some(entry) = self.tasks.get_mut(&id) else {
                continue;
            };
            if entry.actor.is_some() {
                continue;
            }
            let events = EventSink {
                manager: Some(ctx.address().recipient()),
                dispatcher: self.dispatcher.clone(),
            };
            let actor = DownloadTaskActor::new(
                entry.identity.clone(),
                self.options.clone(),
                self.transport.clone(),
                self.store.clone(),
                events,
            )
            .start();
            actor.do_send(StartTask);
            entry.actor = Some(actor);
            self.running += 1;
            log::debug!("任务 {} 获得槽位 ({}/{})", id, self.running, self.options.parallel_task_count);
        }
    }

    /// 归还槽位，返回任务是否仍在表中
    fn release(&mut self, id: TaskId) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        if entry.actor.take().is_some() {
            self.running = self.running.saturating_sub(1);
        }
        true
    }

    /// 还没开始的任务直接取消，不产生任何 I/O
    fn cancel_queued(&mut self, id: TaskId) {
        self.backlog.retain(|queued| *queued != id);
        if let Some(entry) = self.tasks.get(&id) {
            let mut event = TaskEvent::state_changed(id, TaskStatus::Cancelled);
            event.bytes_completed = entry.handle.bytes_completed;
            event.total_size = entry.handle.total_size;
            log::info!("任务 {} 状态: {} -> {}", id, entry.handle.state, TaskStatus::Cancelled);
            self.dispatcher.do_send(event);
        }
        self.destroy(id);
    }

    /// 从表中删除任务并注销它自带的监听器
    fn destroy(&mut self, id: TaskId) {
        if let Some(entry) = self.tasks.remove(&id) {
            if let Some(observer) = entry.observer {
                self.dispatcher.do_send(Unregister { observer });
            }
        }
    }
}
