//! Debounced occupancy counting.
//!
//! `OccupancyCounter` turns the per-frame number of qualifying detections into
//! occupancy events. A change in the raw count must persist for more than
//! `debounce_threshold` consecutive frames before it is confirmed, which absorbs
//! single-frame detector flicker without tracking identities.
//!
//! Occupancy is an undifferentiated scalar: "two people, one left" and "one
//! person swapped for another" are indistinguishable, and several entries or
//! exits inside one debounce window collapse into a single net change.

use serde::Serialize;

use crate::frame::FrameResult;

/// Which count a `CountUpdate` carries while a change is still being debounced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountReporting {
    /// Report the last confirmed count.
    #[default]
    Confirmed,
    /// Report the raw per-frame count.
    Raw,
}

impl std::str::FromStr for CountReporting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Ok(Self::Confirmed),
            "raw" => Ok(Self::Raw),
            other => Err(anyhow::anyhow!(
                "unknown count reporting '{}': expected 'confirmed' or 'raw'",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CounterSettings {
    /// How long a change must persist, in seconds of source time.
    pub debounce_secs: f64,
    pub reporting: CountReporting,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            debounce_secs: 1.0,
            reporting: CountReporting::Confirmed,
        }
    }
}

/// Snapshot of the counter's internal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountState {
    /// Last confirmed occupancy.
    pub previous_count: u32,
    /// Cumulative confirmed entries. Never decreases.
    pub total_count: u32,
    /// Frames since the last confirmed change.
    pub dwell_frame_counter: u64,
    /// Frames the raw count has differed from `previous_count`.
    pub debounce_frame_counter: u64,
    pub debounce_threshold: u64,
}

/// Event emitted by the counter for the publish sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Emitted once per processed frame.
    CountUpdate { current: u32, total: u32 },
    /// Emitted on a confirmed net exit, before that frame's `CountUpdate`.
    DurationReport { seconds: u64 },
}

#[derive(Serialize)]
struct CountPayload {
    count: u32,
    total: u32,
}

#[derive(Serialize)]
struct DurationPayload {
    duration: u64,
}

impl Event {
    /// JSON wire payload for this event.
    pub fn payload(&self) -> serde_json::Result<Vec<u8>> {
        match *self {
            Event::CountUpdate { current, total } => serde_json::to_vec(&CountPayload {
                count: current,
                total,
            }),
            Event::DurationReport { seconds } => {
                serde_json::to_vec(&DurationPayload { duration: seconds })
            }
        }
    }
}

/// Number of detections of `target_class` scoring strictly above `threshold`.
pub fn count_qualifying(result: &FrameResult, target_class: i32, threshold: f32) -> u32 {
    result.qualifying(target_class, threshold).count() as u32
}

/// Frames a change must persist for, derived from the source frame rate.
pub fn debounce_threshold(fps: f64, debounce_secs: f64) -> u64 {
    let frames = (fps * debounce_secs).floor();
    if frames.is_finite() && frames >= 1.0 {
        frames as u64
    } else {
        1
    }
}

pub struct OccupancyCounter {
    state: CountState,
    fps: f64,
    reporting: CountReporting,
}

impl OccupancyCounter {
    pub fn new(fps: f64, settings: CounterSettings) -> Self {
        Self {
            state: CountState {
                debounce_threshold: debounce_threshold(fps, settings.debounce_secs),
                ..CountState::default()
            },
            fps,
            reporting: settings.reporting,
        }
    }

    pub fn state(&self) -> CountState {
        self.state
    }

    /// Feed one frame's raw count and collect the events it produces.
    pub fn update(&mut self, current_count: u32) -> Vec<Event> {
        let state = &mut self.state;
        let mut events = Vec::with_capacity(2);

        state.dwell_frame_counter += 1;

        if current_count == state.previous_count {
            state.debounce_frame_counter = 0;
            events.push(Event::CountUpdate {
                current: current_count,
                total: state.total_count,
            });
            return events;
        }

        state.debounce_frame_counter += 1;
        if state.debounce_frame_counter <= state.debounce_threshold {
            let reported = match self.reporting {
                CountReporting::Confirmed => state.previous_count,
                CountReporting::Raw => current_count,
            };
            events.push(Event::CountUpdate {
                current: reported,
                total: state.total_count,
            });
            return events;
        }

        state.debounce_frame_counter = 0;
        state.total_count += current_count.saturating_sub(state.previous_count);

        if current_count < state.previous_count {
            let seconds = (state.dwell_frame_counter as f64 / self.fps).floor();
            events.push(Event::DurationReport {
                seconds: if seconds.is_finite() { seconds as u64 } else { 0 },
            });
            log::debug!(
                "confirmed exit {} -> {} after {} frames",
                state.previous_count,
                current_count,
                state.dwell_frame_counter
            );
        } else {
            log::debug!(
                "confirmed entry {} -> {} (total {})",
                state.previous_count,
                current_count,
                state.total_count
            );
        }
        state.dwell_frame_counter = 0;
        state.previous_count = current_count;

        events.push(Event::CountUpdate {
            current: current_count,
            total: state.total_count,
        });
        events
    }
}
