//! `console` capability
//!
//! Formatting happens in JavaScript so errors, objects and primitives render
//! the way handler authors expect; the native side only routes finished lines
//! by severity.

use rquickjs::{Ctx, Function, Object};
use tracing::warn;

use crate::output::{Output, Stream};

/// Console severities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn parse(level: &str) -> Self {
        match level {
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Log,
        }
    }

    /// `log`/`info` go to stdout, `warn`/`error` to stderr
    pub fn stream(self) -> Stream {
        match self {
            Self::Log | Self::Info => Stream::Control,
            Self::Warn | Self::Error => Stream::Diagnostic,
        }
    }
}

const CONSOLE_FACTORY: &str = r#"
(function (write) {
    function formatValue(value, nested) {
        if (typeof value === "string") {
            return nested ? JSON.stringify(value) : value;
        }
        if (value instanceof Error) {
            var head = value.message ? value.name + ": " + value.message : String(value.name);
            return value.stack ? head + "\n" + value.stack.replace(/\s+$/, "") : head;
        }
        if (typeof value === "function") {
            return "[Function: " + (value.name || "(anonymous)") + "]";
        }
        if (value === undefined || typeof value === "symbol" || typeof value === "bigint") {
            return String(value);
        }
        if (typeof value === "object" && value !== null) {
            try {
                return JSON.stringify(value);
            } catch (error) {
                return Object.prototype.toString.call(value);
            }
        }
        return String(value);
    }

    function format(args) {
        var parts = [];
        for (var i = 0; i < args.length; i++) {
            parts.push(formatValue(args[i], false));
        }
        return parts.join(" ");
    }

    function method(level) {
        return function () {
            write(level, format(arguments));
        };
    }

    return {
        log: method("log"),
        info: method("info"),
        warn: method("warn"),
        error: method("error"),
        debug: method("log"),
        trace: method("error"),
    };
})
"#;

/// Install `console` on the context's global object
pub(crate) fn install<'js>(ctx: &Ctx<'js>, output: Output) -> rquickjs::Result<()> {
    let write = Function::new(ctx.clone(), move |level: String, text: String| {
        let level = ConsoleLevel::parse(&level);
        if let Err(error) = output.line(level.stream(), &text) {
            warn!(?level, %error, "Failed to write console output");
        }
    })?;

    let factory: Function<'js> = ctx.eval(CONSOLE_FACTORY)?;
    let console: Object<'js> = factory.call((write,))?;
    ctx.globals().set("console", console)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!(ConsoleLevel::parse("log"), ConsoleLevel::Log);
        assert_eq!(ConsoleLevel::parse("info"), ConsoleLevel::Info);
        assert_eq!(ConsoleLevel::parse("warn"), ConsoleLevel::Warn);
        assert_eq!(ConsoleLevel::parse("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::parse("debug"), ConsoleLevel::Log);
    }

    #[test]
    fn test_level_streams() {
        assert_eq!(ConsoleLevel::Log.stream(), Stream::Control);
        assert_eq!(ConsoleLevel::Info.stream(), Stream::Control);
        assert_eq!(ConsoleLevel::Warn.stream(), Stream::Diagnostic);
        assert_eq!(ConsoleLevel::Error.stream(), Stream::Diagnostic);
    }
}
