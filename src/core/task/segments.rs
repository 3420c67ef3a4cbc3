//! 分段计划与分段进度板
//!
//! 计划把 `[0, total)` 切成互不重叠、首尾相接的若干段；进度板为每一段保存一个原子计数器，
//! 由负责该段的 worker 独占写入，执行器读取并求和。

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Pending,
    Active,
    Done,
    Failed,
}

/// 一个分段，`end` 不包含在内；大小未知时 `end` 为 `None`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    pub end: Option<u64>,
    pub bytes_completed: u64,
    pub state: SegmentState,
}

impl Segment {
    pub fn new(index: usize, start: u64, end: Option<u64>) -> Self {
        let state = if end == Some(start) {
            SegmentState::Done
        } else {
            SegmentState::Pending
        };
        Self {
            index,
            start,
            end,
            bytes_completed: 0,
            state,
        }
    }

    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// 续传时下一次请求的起始偏移
    pub fn resume_offset(&self) -> u64 {
        self.start + self.bytes_completed
    }

    pub fn is_done(&self) -> bool {
        self.state == SegmentState::Done
    }
}

/// 生成分段计划
///
/// 段数为 `min(thread_count, ceil(total / min_segment_size))`，至少一段。
/// 不支持范围请求或大小未知时只有一段。
pub fn plan_segments(
    total_size: Option<u64>,
    supports_range: bool,
    thread_count: usize,
    min_segment_size: u64,
) -> Vec<Segment> {
    let total = match total_size {
        Some(total) if supports_range && total > 0 => total,
        _ => return vec![Segment::new(0, 0, total_size)],
    };

    let min_segment_size = min_segment_size.max(1);
    let by_size = total.div_ceil(min_segment_size);
    let count = (thread_count.max(1) as u64).min(by_size).max(1);

    let base = total / count;
    let remainder = total % count;
    let mut segments = Vec::with_capacity(count as usize);
    let mut start = 0;
    for index in 0..count {
        // 余数平摊到前几段
        let len = base + u64::from(index < remainder);
        segments.push(Segment::new(index as usize, start, Some(start + len)));
        start += len;
    }
    segments
}

/// 检查分段是否恰好覆盖 `[0, total)`
pub fn is_partition(segments: &[Segment], total_size: Option<u64>) -> bool {
    if segments.is_empty() {
        return false;
    }
    let mut expected_start = 0;
    for (i, segment) in segments.iter().enumerate() {
        if segment.start != expected_start {
            return false;
        }
        match segment.end {
            Some(end) => {
                if end < segment.start || segment.bytes_completed > end - segment.start {
                    return false;
                }
                expected_start = end;
            }
            // 只有大小未知的单段计划允许开放结尾
            None => return total_size.is_none() && i == segments.len() - 1 && segments.len() == 1,
        }
    }
    total_size == Some(expected_start)
}

/// 进度板中的一格
#[derive(Debug)]
pub struct SegmentSlot {
    pub index: usize,
    pub start: u64,
    pub end: Option<u64>,
    completed: AtomicU64,
    retries: AtomicU32,
    state: Cell<SegmentState>,
}

impl SegmentSlot {
    pub fn bytes_completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn add_bytes(&self, n: u64) {
        self.completed.fetch_add(n, Ordering::AcqRel);
    }

    /// 服务器不支持范围请求时只能从头再来
    pub fn reset_progress(&self) {
        self.completed.store(0, Ordering::Release);
    }

    pub fn resume_offset(&self) -> u64 {
        self.start + self.bytes_completed()
    }

    /// 还差多少字节，大小未知时为 `None`
    pub fn remaining(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.resume_offset()))
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::AcqRel);
    }

    pub fn state(&self) -> SegmentState {
        self.state.get()
    }

    pub fn set_state(&self, state: SegmentState) {
        self.state.set(state);
    }
}

/// 一次运行期间所有分段的实时进度
#[derive(Debug)]
pub struct ProgressBoard {
    slots: Vec<SegmentSlot>,
}

impl ProgressBoard {
    pub fn new(segments: Vec<Segment>) -> Self {
        let slots = segments
            .into_iter()
            .enumerate()
            .map(|(index, segment)| {
                let done = segment.is_done()
                    || segment.len().is_some_and(|len| segment.bytes_completed >= len);
                SegmentSlot {
                    index,
                    start: segment.start,
                    end: segment.end,
                    completed: AtomicU64::new(segment.bytes_completed),
                    retries: AtomicU32::new(0),
                    state: Cell::new(if done {
                        SegmentState::Done
                    } else {
                        SegmentState::Pending
                    }),
                }
            })
            .collect();
        Self { slots }
    }

    pub fn slot(&self, index: usize) -> &SegmentSlot {
        &self.slots[index]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.state() != SegmentState::Done)
            .map(|slot| slot.index)
            .collect()
    }

    pub fn bytes_completed(&self) -> u64 {
        self.slots.iter().map(SegmentSlot::bytes_completed).sum()
    }

    pub fn retry_count(&self) -> u32 {
        self.slots.iter().map(SegmentSlot::retries).sum()
    }

    pub fn all_done(&self) -> bool {
        self.slots.iter().all(|slot| slot.state() == SegmentState::Done)
    }

    pub fn snapshot(&self) -> Vec<Segment> {
        self.slots
            .iter()
            .map(|slot| Segment {
                index: slot.index,
                start: slot.start,
                end: slot.end,
                bytes_completed: slot.bytes_completed(),
                state: slot.state(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_ten_megabytes_four_threads() {
        let segments = plan_segments(Some(10 * MB), true, 4, MB);
        assert_eq!(segments.len(), 4);
        for segment in &segments {
            assert_eq!(segment.len(), Some(10 * MB / 4));
        }
        assert_eq!(segments[3].end, Some(10 * MB));
        assert!(is_partition(&segments, Some(10 * MB)));
    }

    #[test]
    fn test_plan_bounded_by_min_segment_size() {
        // 3.5 个最小分段向上取整为 4 段
        let segments = plan_segments(Some(7 * MB / 2), true, 16, MB);
        assert_eq!(segments.len(), 4);
        let segments = plan_segments(Some(100), true, 8, MB);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end, Some(100));
    }

    #[test]
    fn test_plan_spreads_remainder() {
        for total in [1u64, 2, 3, 17, 1000, 4097, 10 * MB + 3] {
            for threads in [1usize, 2, 3, 4, 7] {
                let segments = plan_segments(Some(total), true, threads, 1);
                assert!(is_partition(&segments, Some(total)), "{} {}", total, threads);
                let lens: Vec<u64> = segments.iter().filter_map(Segment::len).collect();
                let (min, max) = (lens.iter().min().unwrap(), lens.iter().max().unwrap());
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn test_plan_single_segment_fallbacks() {
        let no_range = plan_segments(Some(10 * MB), false, 4, MB);
        assert_eq!(no_range.len(), 1);
        assert_eq!(no_range[0].end, Some(10 * MB));

        let unknown = plan_segments(None, true, 4, MB);
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].end, None);
        assert!(is_partition(&unknown, None));

        let empty = plan_segments(Some(0), true, 4, MB);
        assert_eq!(empty.len(), 1);
        assert!(empty[0].is_done());
        assert!(is_partition(&empty, Some(0)));
    }

    #[test]
    fn test_partition_rejects_gaps_and_overflow() {
        let mut segments = plan_segments(Some(1000), true, 2, 1);
        assert!(!is_partition(&segments, Some(999)));
        segments[1].start += 1;
        assert!(!is_partition(&segments, Some(1000)));

        let mut segments = plan_segments(Some(1000), true, 2, 1);
        segments[0].bytes_completed = 501;
        assert!(!is_partition(&segments, Some(1000)));
        assert!(!is_partition(&[], Some(0)));
    }

    #[test]
    fn test_progress_board_counts() {
        let mut segments = plan_segments(Some(1000), true, 2, 1);
        segments[0].bytes_completed = 500;
        segments[1].bytes_completed = 120;
        let board = ProgressBoard::new(segments);
        assert_eq!(board.pending_indices(), vec![1]);
        assert_eq!(board.slot(1).resume_offset(), 620);
        assert_eq!(board.slot(1).remaining(), Some(380));

        board.slot(1).add_bytes(380);
        board.slot(1).set_state(SegmentState::Done);
        assert_eq!(board.bytes_completed(), 1000);
        assert!(board.all_done());
        assert_eq!(board.snapshot()[1].bytes_completed, 500);
    }
}
