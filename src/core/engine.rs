//! 引擎句柄：把调度器、事件分发器和外部依赖装配在一起
//!
//! 每次构造都得到一个独立的引擎，需要在 actix `System` 里使用。

use actix::prelude::*;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::{Config, DownloadOptions};
use crate::core::actor_manager::{
    CancelTaskById, ClearAll, DownloadManagerActor, PauseTaskById, QueryTaskById, RemoveTaskById,
    ResumeTaskById, SnapshotQueue, SubmitTask,
};
use crate::core::breakpoint::{JsonBreakpointStore, MemoryBreakpointStore, SharedStore};
use crate::core::dispatcher::{
    EventDispatcher, Flush, ListenerTable, ObserverCount, ObserverId, Register, TaskListener, Unregister,
};
use crate::core::error::DownloadResult;
use crate::core::http::{AwcTransport, SharedTransport};
use crate::core::task::{TaskHandle, TaskId};

pub struct DownloadEngine {
    manager: Addr<DownloadManagerActor>,
    dispatcher: Addr<EventDispatcher>,
    /// 分发器所在的线程
    delivery: Arbiter,
}

impl DownloadEngine {
    /// 按配置创建引擎：`enable_resume` 为真时断点写到 `breakpoint_dir`
    pub fn open(config: &Config) -> DownloadResult<Self> {
        config.validate()?;
        let options = DownloadOptions::from_config(config);
        let store: SharedStore = if config.enable_resume {
            Rc::new(JsonBreakpointStore::open(&config.breakpoint_dir)?)
        } else {
            Rc::new(MemoryBreakpointStore::default())
        };
        let transport: SharedTransport = Rc::new(AwcTransport::new(&options.user_agent, options.connect_timeout));
        log::info!(
            "下载引擎已创建: 并行任务 {}，分段线程 {}",
            options.parallel_task_count,
            options.thread_count
        );
        Ok(Self::with_parts(options, transport, store))
    }

    pub fn with_parts(options: DownloadOptions, transport: SharedTransport, store: SharedStore) -> Self {
        let (dispatcher, delivery) = EventDispatcher::start_dedicated();
        let manager = DownloadManagerActor::new(options.resolved(), transport, store, dispatcher.clone()).start();
        Self {
            manager,
            dispatcher,
            delivery,
        }
    }

    pub async fn submit(
        &self,
        destination: impl Into<PathBuf>,
        url: impl Into<String>,
        listener: Option<Arc<dyn TaskListener>>,
    ) -> DownloadResult<TaskHandle> {
        let handle = self
            .manager
            .send(SubmitTask {
                destination: destination.into(),
                url: url.into(),
                listener,
            })
            .await?;
        Ok(handle)
    }

    pub async fn cancel(&self, task_id: TaskId) -> DownloadResult<bool> {
        Ok(self.manager.send(CancelTaskById { task_id }).await?)
    }

    pub async fn pause(&self, task_id: TaskId) -> DownloadResult<bool> {
        Ok(self.manager.send(PauseTaskById { task_id }).await?)
    }

    pub async fn resume(&self, task_id: TaskId) -> DownloadResult<bool> {
        Ok(self.manager.send(ResumeTaskById { task_id }).await?)
    }

    pub async fn remove(&self, task_id: TaskId) -> DownloadResult<bool> {
        Ok(self.manager.send(RemoveTaskById { task_id }).await?)
    }

    /// 返回时所有任务的文件句柄都已释放
    pub async fn clear_all(&self) -> DownloadResult<()> {
        Ok(self.manager.send(ClearAll).await?)
    }

    pub async fn snapshot_queue(&self) -> DownloadResult<Vec<TaskHandle>> {
        Ok(self.manager.send(SnapshotQueue).await?)
    }

    pub async fn task(&self, task_id: TaskId) -> DownloadResult<Option<TaskHandle>> {
        Ok(self.manager.send(QueryTaskById { task_id }).await?)
    }

    /// 注册一组监听器，分发器只持有弱引用
    pub fn register(&self, table: ListenerTable) -> ObserverId {
        let observer = ObserverId::next();
        self.dispatcher.do_send(Register { observer, table });
        observer
    }

    pub fn unregister(&self, observer: ObserverId) {
        self.dispatcher.do_send(Unregister { observer });
    }

    /// 等待此前发出的事件全部送达
    pub async fn flush_events(&self) -> DownloadResult<()> {
        Ok(self.dispatcher.send(Flush).await?)
    }

    pub async fn observer_count(&self) -> DownloadResult<usize> {
        Ok(self.dispatcher.send(ObserverCount).await?)
    }

    /// 取消全部任务、送完剩余事件后停止分发线程
    pub async fn shutdown(self) -> DownloadResult<()> {
        self.clear_all().await?;
        self.flush_events().await?;
        log::info!("下载引擎已关闭");
        Ok(())
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        self.delivery.stop();
    }
}
