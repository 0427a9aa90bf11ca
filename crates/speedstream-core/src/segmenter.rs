//! Segment arithmetic: carving `[0, content_length)` into worker ranges.

/// A half-open byte range `[start, end)` of the logical stream, assigned to
/// exactly one worker and never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Allocates contiguous, non-overlapping segments front to back with an
/// adaptively growing size: the first segment uses the configured minimum so
/// the window fills quickly and the client starts receiving data early, then
/// each hand-out doubles the size up to the configured maximum, amortising
/// per-request overhead once the pipeline is primed.
#[derive(Debug)]
pub struct SegmentPlanner {
    content_length: u64,
    /// Highest stream position already carved into a segment.
    allocated: u64,
    segment_size: u64,
    max_segment_size: u64,
}

impl SegmentPlanner {
    pub fn new(content_length: u64, min_segment_size: u64, max_segment_size: u64) -> Self {
        SegmentPlanner {
            content_length,
            allocated: 0,
            segment_size: min_segment_size.max(1),
            max_segment_size: max_segment_size.max(min_segment_size).max(1),
        }
    }

    /// Next unassigned segment, truncated at the end of the stream, or
    /// `None` once the whole stream has been handed out.
    pub fn next(&mut self) -> Option<Segment> {
        let remaining = self.content_length.saturating_sub(self.allocated);
        if remaining == 0 {
            return None;
        }
        let size = self.segment_size.min(remaining);
        let segment = Segment {
            start: self.allocated,
            end: self.allocated + size,
        };
        self.allocated += size;
        self.segment_size = (self.segment_size * 2).min(self.max_segment_size);
        Some(segment)
    }
}
