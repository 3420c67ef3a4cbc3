use actix::prelude::*;
use tokio::sync::oneshot;

use super::executor::{EventSink, RunOutcome, TaskRun};
use super::model::{EventKind, TaskEvent, TaskIdentity};
use super::state::TaskStatus;
use super::util::TaskControl;
use crate::config::DownloadOptions;
use crate::core::breakpoint::SharedStore;
use crate::core::http::SharedTransport;

/// 单任务 Actor
///
/// 持有任务在运行期间独占的一切：控制句柄、当前运行的 future 以及等待其结束的取消方。
pub struct DownloadTaskActor {
    pub identity: TaskIdentity,
    pub status: TaskStatus,
    pub options: DownloadOptions,
    pub transport: SharedTransport,
    pub store: SharedStore,
    pub events: EventSink,
    pub control: TaskControl,
    pub run: Option<SpawnHandle>,
    /// 最近一次运行结束时的快照
    pub last_event: Option<TaskEvent>,
    pub stop_waiters: Vec<oneshot::Sender<()>>,
}

impl Actor for DownloadTaskActor {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::debug!("任务 Actor {} 已停止", self.identity.id);
    }
}

impl DownloadTaskActor {
    pub fn new(
        identity: TaskIdentity,
        options: DownloadOptions,
        transport: SharedTransport,
        store: SharedStore,
        events: EventSink,
    ) -> Self {
        Self {
            identity,
            status: TaskStatus::Pending,
            options,
            transport,
            store,
            events,
            control: TaskControl::default(),
            run: None,
            last_event: None,
            stop_waiters: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub(crate) fn start_run(&mut self, ctx: &mut Context<Self>) {
        if self.is_running() {
            return;
        }
        self.control.reset();
        let run = TaskRun::new(
            self.identity.clone(),
            self.options.clone(),
            self.transport.clone(),
            self.store.clone(),
            self.control.clone(),
            self.events.clone(),
            self.status,
        );
        self.status = TaskStatus::Probing;
        let handle = ctx.spawn(
            run.run()
                .into_actor(self)
                .map(|(outcome, last_event), act, ctx| act.on_run_finished(outcome, last_event, ctx)),
        );
        self.run = Some(handle);
    }

    fn on_run_finished(&mut self, outcome: RunOutcome, last_event: TaskEvent, ctx: &mut Context<Self>) {
        self.run = None;
        self.status = outcome.status();
        self.last_event = Some(last_event);
        self.notify_stopped();
        if self.status.is_terminal() {
            ctx.stop();
        }
    }

    pub(crate) fn notify_stopped(&mut self) {
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// 暂停中被取消：断点已经在暂停时写好，只需要补发事件
    pub(crate) fn cancel_idle(&mut self, ctx: &mut Context<Self>) {
        let mut event = self
            .last_event
            .clone()
            .unwrap_or_else(|| TaskEvent::state_changed(self.identity.id, self.status));
        event.kind = EventKind::StateChanged;
        event.state = TaskStatus::Cancelled;
        event.speed = 0;
        event.error = None;
        log::info!("任务 {} 状态: {} -> {}", self.identity.id, self.status, TaskStatus::Cancelled);
        self.status = TaskStatus::Cancelled;
        self.events.emit(event);
        ctx.stop();
    }
}
