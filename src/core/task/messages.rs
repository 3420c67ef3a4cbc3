use actix::Message;

/// 开始运行（调度器分配到槽位后发送）
pub struct StartTask;
impl Message for StartTask { type Result = (); }

/// 暂停任务，返回是否生效
pub struct PauseTask;
impl Message for PauseTask { type Result = bool; }

/// 恢复已暂停的任务，返回是否生效
pub struct ResumeTask;
impl Message for ResumeTask { type Result = bool; }

/// 取消任务，等到文件句柄释放后才返回
pub struct CancelTask;
impl Message for CancelTask { type Result = (); }
