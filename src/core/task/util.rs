use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// 在指定偏移处写入整个缓冲区，不移动文件游标
///
/// 各分段写互不重叠的区间，共享同一个文件句柄即可，不需要加锁。
pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_all_at(buf, offset)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut written = 0usize;
        while written < buf.len() {
            let n = file.seek_write(&buf[written..], offset + written as u64)?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            written += n;
        }
        Ok(())
    }
}

/// 下载速度统计，按采样窗口计算
#[derive(Debug)]
pub struct SpeedMeter {
    window: Duration,
    window_start: Instant,
    window_bytes: u64,
    speed: u64,
}

impl SpeedMeter {
    pub fn new(window: Duration, initial_bytes: u64) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            window_bytes: initial_bytes,
            speed: 0,
        }
    }

    /// 传入当前已完成字节数，返回最近一个窗口的速度（字节/秒）
    pub fn sample(&mut self, total_bytes: u64) -> u64 {
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window {
            let delta = total_bytes.saturating_sub(self.window_bytes);
            self.speed = (delta as f64 / elapsed.as_secs_f64().max(0.001)) as u64;
            self.window_start = Instant::now();
            self.window_bytes = total_bytes;
        }
        self.speed
    }

    pub fn speed(&self) -> u64 {
        self.speed
    }
}

/// 发给 worker 的控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
    /// 某个分段彻底失败，其余分段停止
    Abort,
}

/// 任务的协作式控制句柄
#[derive(Debug, Clone)]
pub struct TaskControl {
    tx: Arc<watch::Sender<ControlSignal>>,
}

impl Default for TaskControl {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(ControlSignal::Run);
        Self { tx: Arc::new(tx) }
    }
}

impl TaskControl {
    pub fn signal(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.signal() == ControlSignal::Run
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlSignal> {
        self.tx.subscribe()
    }

    /// 只有运行中的任务能暂停，返回是否生效
    pub fn pause(&self) -> bool {
        if self.is_running() {
            self.tx.send_replace(ControlSignal::Pause);
            true
        } else {
            false
        }
    }

    /// 取消优先于暂停和中止
    pub fn cancel(&self) {
        self.tx.send_replace(ControlSignal::Cancel);
    }

    pub fn abort(&self) {
        if self.is_running() {
            self.tx.send_replace(ControlSignal::Abort);
        }
    }

    pub fn reset(&self) {
        self.tx.send_replace(ControlSignal::Run);
    }
}

/// 等到控制信号不再是 `Run`
pub async fn interrupted(rx: &mut watch::Receiver<ControlSignal>) -> ControlSignal {
    loop {
        let signal = *rx.borrow_and_update();
        if signal != ControlSignal::Run {
            return signal;
        }
        if rx.changed().await.is_err() {
            // 控制端已销毁，不会再有信号
            return futures::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_all_at_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let file = File::create(&path).unwrap();
        file.set_len(8).unwrap();
        write_all_at(&file, b"5678", 4).unwrap();
        write_all_at(&file, b"1234", 0).unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"12345678");
    }

    #[test]
    fn test_control_signals() {
        let control = TaskControl::default();
        assert!(control.is_running());
        assert!(control.pause());
        assert!(!control.pause());
        control.abort();
        assert_eq!(control.signal(), ControlSignal::Pause);
        control.cancel();
        assert_eq!(control.signal(), ControlSignal::Cancel);
        control.reset();
        assert!(control.is_running());
    }

    #[test]
    fn test_interrupted_wakes_on_signal() {
        tokio_test::block_on(async {
            let control = TaskControl::default();
            let mut rx = control.subscribe();
            let waiter = interrupted(&mut rx);
            control.cancel();
            assert_eq!(waiter.await, ControlSignal::Cancel);
        });
    }

    #[test]
    fn test_speed_meter() {
        let mut meter = SpeedMeter::new(Duration::ZERO, 0);
        std::thread::sleep(Duration::from_millis(20));
        let speed = meter.sample(1000);
        assert!(speed > 0);
        assert_eq!(meter.speed(), speed);
    }
}
