//! Timer capability
//!
//! `setTimeout`, `setInterval`, `setImmediate` and their `clear*`
//! counterparts. Callbacks are parked in a queue owned by one execution
//! context; the engine sleeps until the earliest deadline and fires due
//! callbacks. The queue is cleared when the context is discarded, so no timer
//! outlives its invocation.

use rquickjs::{Ctx, Function, Object, Persistent, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

/// Node clamps delays to a signed 32-bit millisecond range
const MAX_DELAY_MS: f64 = 2_147_483_647.0;

struct Timer {
    due: Instant,
    interval: Option<Duration>,
    callback: Persistent<Function<'static>>,
}

/// Pending timers of one context
#[derive(Default)]
pub struct TimerQueue {
    next_id: u32,
    timers: BTreeMap<u32, Timer>,
}

pub(crate) type SharedTimers = Rc<RefCell<TimerQueue>>;

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn schedule(
        &mut self,
        callback: Persistent<Function<'static>>,
        delay: Duration,
        repeat: bool,
        now: Instant,
    ) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = self.next_id;
        self.timers.insert(
            id,
            Timer {
                due: now + delay,
                interval: repeat.then_some(delay),
                callback,
            },
        );
        id
    }

    fn cancel(&mut self, id: u32) {
        self.timers.remove(&id);
    }

    /// Earliest deadline among pending timers
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|timer| timer.due).min()
    }

    /// Take the earliest timer due at `now`. Intervals are re-armed.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Persistent<Function<'static>>> {
        let (&id, _) = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.due <= now)
            .min_by_key(|(id, timer)| (timer.due, **id))?;

        let mut timer = self.timers.remove(&id)?;
        match timer.interval {
            Some(interval) => {
                let callback = timer.callback.clone();
                timer.due = now + interval;
                self.timers.insert(id, timer);
                Some(callback)
            }
            None => Some(timer.callback),
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Drop every pending callback
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

/// Convert a JavaScript delay argument the way Node does
pub fn delay_from_js(delay: f64) -> Duration {
    let millis = if delay.is_finite() && delay >= 1.0 {
        delay.min(MAX_DELAY_MS)
    } else {
        1.0
    };
    Duration::from_secs_f64(millis / 1000.0)
}

const TIMER_FACTORY: &str = r#"
(function (schedule, immediate, cancel) {
    var slice = Array.prototype.slice;

    function bind(callback, args) {
        if (typeof callback !== "function") {
            throw new TypeError('The "callback" argument must be of type function');
        }
        return function () {
            callback.apply(undefined, args);
        };
    }

    function clear(id) {
        if (typeof id === "number") {
            cancel(id);
        }
    }

    return {
        setTimeout: function (callback, delay) {
            return schedule(bind(callback, slice.call(arguments, 2)), Number(delay), false);
        },
        setInterval: function (callback, delay) {
            return schedule(bind(callback, slice.call(arguments, 2)), Number(delay), true);
        },
        setImmediate: function (callback) {
            return immediate(bind(callback, slice.call(arguments, 1)));
        },
        clearTimeout: clear,
        clearInterval: clear,
        clearImmediate: clear,
    };
})
"#;

const TIMER_GLOBALS: [&str; 6] = [
    "setTimeout",
    "setInterval",
    "setImmediate",
    "clearTimeout",
    "clearInterval",
    "clearImmediate",
];

/// Install the timer functions on the context's global object
pub(crate) fn install<'js>(ctx: &Ctx<'js>, timers: &SharedTimers) -> rquickjs::Result<()> {
    let queue = Rc::clone(timers);
    let schedule = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, callback: Function<'js>, delay: f64, repeat: bool| -> u32 {
            let callback = Persistent::save(&ctx, callback);
            queue
                .borrow_mut()
                .schedule(callback, delay_from_js(delay), repeat, Instant::now())
        },
    )?;

    // setImmediate runs on the next turn, ahead of setTimeout(fn, 0)
    let queue = Rc::clone(timers);
    let immediate = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, callback: Function<'js>| -> u32 {
            let callback = Persistent::save(&ctx, callback);
            queue
                .borrow_mut()
                .schedule(callback, Duration::ZERO, false, Instant::now())
        },
    )?;

    let queue = Rc::clone(timers);
    let cancel = Function::new(ctx.clone(), move |id: f64| {
        if id.is_finite() && id >= 1.0 && id <= f64::from(u32::MAX) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            queue.borrow_mut().cancel(id as u32);
        }
    })?;

    let factory: Function<'js> = ctx.eval(TIMER_FACTORY)?;
    let functions: Object<'js> = factory.call((schedule, immediate, cancel))?;

    let globals = ctx.globals();
    for name in TIMER_GLOBALS {
        let function: Value<'js> = functions.get(name)?;
        globals.set(name, function)?;
    }

    Ok(())
}
