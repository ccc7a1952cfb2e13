//! 时间快照 [`Mark`]。
//!
//! 标记记录创建时刻与时钟内序号，可与持续时间、时间点及其他标记做加减，
//! 用于在测试中表达 “某事发生在另一事之后多久”。

use std::cmp::Ordering;
use std::ops::{Add, Sub};

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};

/// 时钟某一时刻的快照。
///
/// # 契约说明（What）
/// - 同一时钟产生的标记按 `(when, seq)` 全序，时间相同的标记按创建顺序排序；
/// - 不同时钟产生的标记之间不可比较，`partial_cmp` 返回 `None`；
/// - 两个标记相减、标记与任意时区的时间点相减，都得到时间点之差；
/// - `Mark ± TimeDelta` 得到时间点，越界时与 chrono 的时间点运算一样 panic，
///   需要显式处理越界时使用 [`checked_add`](Self::checked_add)/[`checked_sub`](Self::checked_sub)。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mark {
    clock_id: u64,
    when: DateTime<Utc>,
    seq: u64,
    start: DateTime<Utc>,
    local_offset: FixedOffset,
}

impl Mark {
    pub(super) fn new(
        clock_id: u64,
        when: DateTime<Utc>,
        seq: u64,
        start: DateTime<Utc>,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            clock_id,
            when,
            seq,
            start,
            local_offset,
        }
    }

    pub fn when(&self) -> DateTime<Utc> {
        self.when
    }

    pub fn local(&self) -> DateTime<FixedOffset> {
        self.when.with_timezone(&self.local_offset)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// 标记时刻相对时钟起点经过的时间。
    pub fn elapsed(&self) -> TimeDelta {
        self.when - self.start
    }

    pub fn checked_add(&self, delta: TimeDelta) -> Option<DateTime<Utc>> {
        self.when.checked_add_signed(delta)
    }

    pub fn checked_sub(&self, delta: TimeDelta) -> Option<DateTime<Utc>> {
        self.when.checked_sub_signed(delta)
    }
}

impl PartialOrd for Mark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.clock_id != other.clock_id {
            return None;
        }
        Some((self.when, self.seq).cmp(&(other.when, other.seq)))
    }
}

impl Sub for Mark {
    type Output = TimeDelta;

    fn sub(self, rhs: Self) -> TimeDelta {
        self.when - rhs.when
    }
}

impl Sub<TimeDelta> for Mark {
    type Output = DateTime<Utc>;

    fn sub(self, rhs: TimeDelta) -> DateTime<Utc> {
        self.when - rhs
    }
}

impl Add<TimeDelta> for Mark {
    type Output = DateTime<Utc>;

    fn add(self, rhs: TimeDelta) -> DateTime<Utc> {
        self.when + rhs
    }
}

impl<Tz: TimeZone> Sub<DateTime<Tz>> for Mark {
    type Output = TimeDelta;

    fn sub(self, rhs: DateTime<Tz>) -> TimeDelta {
        self.when - rhs.with_timezone(&Utc)
    }
}

impl<Tz: TimeZone> Sub<Mark> for DateTime<Tz> {
    type Output = TimeDelta;

    fn sub(self, rhs: Mark) -> TimeDelta {
        self.with_timezone(&Utc) - rhs.when
    }
}
