use std::{
    io::{self, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{Reference, Runtime};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// The outside world as seen from primitives 150 and up.
///
/// A host answers `None` for numbers it does not implement; the runtime then
/// answers nil.
pub trait Host: Send {
    fn print(&mut self, text: &str);

    fn primitive(&mut self, rt: &mut Runtime, number: u8, args: &[Reference])
    -> Option<Reference>;
}

/// Wall clock time of day with an adjustable offset, so setting the time
/// never touches the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    offset: i64,
}

impl Clock {
    fn system_seconds() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as i64)
    }

    /// Seconds since midnight.
    pub fn seconds_of_day(&self) -> i64 {
        (Self::system_seconds() + self.offset).rem_euclid(SECONDS_PER_DAY)
    }

    /// `(hour, minute, second)`.
    pub fn time_of_day(&self) -> (i64, i64, i64) {
        let seconds = self.seconds_of_day();
        (seconds / 3600, seconds / 60 % 60, seconds % 60)
    }

    /// Moves the clock so it reads the given time now. Answers false for
    /// values outside a day.
    pub fn set_time_of_day(&mut self, hour: i64, minute: i64, second: i64) -> bool {
        let in_range = (0..24).contains(&hour)
            && (0..60).contains(&minute)
            && (0..60).contains(&second);
        if !in_range {
            return false;
        }
        let wanted = hour * 3600 + minute * 60 + second;
        let drift = wanted - self.seconds_of_day();
        self.offset = (self.offset + drift).rem_euclid(SECONDS_PER_DAY);
        true
    }
}

/// Host for desktop use: text goes to a writer, time comes from [`Clock`].
pub struct StdHost {
    out: Box<dyn Write + Send>,
    clock: Clock,
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl StdHost {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            clock: Clock::default(),
        }
    }

    fn time_array(&self, rt: &mut Runtime) -> Reference {
        let (hour, minute, second) = self.clock.time_of_day();
        rt.array_of(&[
            Reference::from_small_int(hour as i32),
            Reference::from_small_int(minute as i32),
            Reference::from_small_int(second as i32),
        ])
    }
}

impl Host for StdHost {
    fn print(&mut self, text: &str) {
        let written = self.out.write_all(text.as_bytes());
        if let Err(err) = written.and_then(|_| self.out.flush()) {
            log::warn!("print failed: {err}");
        }
    }

    fn primitive(
        &mut self,
        rt: &mut Runtime,
        number: u8,
        args: &[Reference],
    ) -> Option<Reference> {
        match number {
            150 => {
                let Some(&text) = args.first().filter(|&&arg| rt.is_string(arg)) else {
                    return Some(Reference::NIL);
                };
                let string = rt.memory.string(text);
                self.print(&string);
                Some(text)
            }
            151 => {
                self.print("\n");
                Some(Reference::NIL)
            }
            152 => Some(self.time_array(rt)),
            153 => {
                let [hour, minute, second, ..] = *args else {
                    return Some(Reference::NIL);
                };
                let parts = (hour.small_int(), minute.small_int(), second.small_int());
                let (Some(hour), Some(minute), Some(second)) = parts else {
                    return Some(Reference::NIL);
                };
                if !self
                    .clock
                    .set_time_of_day(hour as i64, minute as i64, second as i64)
                {
                    return Some(Reference::NIL);
                }
                Some(self.time_array(rt))
            }
            154 => {
                let millis = rt.uptime_millis() & crate::SMALL_INT_MAX as u64;
                Some(Reference::from_small_int(millis as i32))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{RuntimeCreateInfo, bootstrap};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_runtime() -> (Runtime, Captured) {
        let out = Captured::default();
        let rt = bootstrap(RuntimeCreateInfo {
            host: Some(Box::new(StdHost::new(Box::new(out.clone())))),
            ..Default::default()
        });
        (rt, out)
    }

    #[test]
    fn print_primitives_write_to_the_host() {
        let (mut rt, out) = captured_runtime();
        let text = rt.new_string("hello");
        rt.memory.incr(text);
        assert_eq!(rt.primitive(150, &[text]), text);
        rt.primitive(151, &[]);
        assert_eq!(rt.primitive(83, &[text]), text);
        assert_eq!(out.0.lock().as_slice(), b"hello\nhello");
        assert_eq!(rt.primitive(150, &[Reference::from_small_int(1)]), Reference::NIL);
    }

    #[test]
    fn setting_the_time_moves_the_clock() {
        let mut clock = Clock::default();
        assert!(clock.set_time_of_day(13, 45, 0));
        let (hour, minute, _) = clock.time_of_day();
        assert_eq!(hour, 13);
        // the minute may roll over while the test runs
        assert!(minute == 45 || minute == 46);
        assert!(!clock.set_time_of_day(24, 0, 0));
    }

    #[test]
    fn time_primitives_answer_arrays() {
        let (mut rt, _) = captured_runtime();
        let small = Reference::from_small_int;
        let time = rt.primitive(153, &[small(8), small(30), small(0)]);
        assert_eq!(rt.class_of(time), rt.special.array_class);
        assert_eq!(rt.memory.slot(time, 0), small(8));

        let now = rt.primitive(152, &[]);
        assert_eq!(rt.memory.slot_count(now), 3);
        assert_eq!(rt.primitive(153, &[small(99), small(0), small(0)]), Reference::NIL);
    }
}
