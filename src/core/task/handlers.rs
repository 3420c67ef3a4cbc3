use actix::prelude::*;
use tokio::sync::oneshot;

use super::actor::DownloadTaskActor;
use super::messages::{CancelTask, PauseTask, ResumeTask, StartTask};
use super::state::TaskStatus;

impl Handler<StartTask> for DownloadTaskActor {
    type Result = ();

    fn handle(&mut self, _msg: StartTask, ctx: &mut Self::Context) {
        if self.status == TaskStatus::Pending {
            self.start_run(ctx);
        }
    }
}

impl Handler<PauseTask> for DownloadTaskActor {
    type Result = bool;

    fn handle(&mut self, _msg: PauseTask, _ctx: &mut Self::Context) -> bool {
        // worker 在下一个读取边界停下，断点写好后才发 PAUSED
        self.is_running() && self.control.pause()
    }
}

impl Handler<ResumeTask> for DownloadTaskActor {
    type Result = bool;

    fn handle(&mut self, _msg: ResumeTask, ctx: &mut Self::Context) -> bool {
        if self.is_running() || self.status != TaskStatus::Paused {
            return false;
        }
        log::info!("恢复任务 {}", self.identity.id);
        self.start_run(ctx);
        true
    }
}

impl Handler<CancelTask> for DownloadTaskActor {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, _msg: CancelTask, ctx: &mut Self::Context) -> Self::Result {
        if self.is_running() {
            self.control.cancel();
            let (tx, rx) = oneshot::channel();
            self.stop_waiters.push(tx);
            return Box::pin(async move {
                let _ = rx.await;
            });
        }
        if !self.status.is_terminal() {
            self.cancel_idle(ctx);
        }
        Box::pin(async {})
    }
}
