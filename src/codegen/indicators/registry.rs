use crate::ast::{find_argument, Expr};
use crate::codegen::emitter::CodeBuffer;
use crate::codegen::error::LowerError;
use crate::codegen::indicators::impls::*;
use crate::codegen::indicators::utils::{ta_function_name, Source};

/// Generator for one inlined TA primitive. The emitted block assigns `target` at `ctx.BarIndex`.
pub trait InlineIndicator {
    fn name(&self) -> &'static str;
    fn period(&self) -> usize;
    /// Bars before this index are NaN.
    fn warmup(&self) -> usize;
    /// Locals declared once before the bar loop.
    fn state(&self, target: &str) -> Vec<String>;
    fn emit(&self, target: &str, out: &mut CodeBuffer);
}

/// Longest period an inlined indicator accepts. Warmups and fetch limits derived from a
/// period stay far below Go's `int` range.
pub const MAX_PERIOD: usize = 1_000_000;

pub struct IndicatorRegistry;

impl Default for IndicatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Position of the period argument for a TA function (`ta.` prefix optional).
    pub fn period_argument(&self, function: &str) -> Option<usize> {
        match ta_function_name(function) {
            "sma" | "ema" | "rma" | "wma" | "stdev" | "rsi" | "highest" | "lowest" | "change"
            | "mom" => Some(1),
            "atr" => Some(0),
            _ => None,
        }
    }

    /// Period literal of a TA call, 0 when absent, non-literal or not positive. Clamped to
    /// [`MAX_PERIOD`].
    pub fn get_lookback(&self, function: &str, arguments: &[Expr]) -> usize {
        let Some(position) = self.period_argument(function) else {
            return 0;
        };
        find_argument(arguments, position, "length")
            .and_then(Expr::as_number)
            .filter(|period| *period >= 1.0)
            .map(|period| period.min(MAX_PERIOD as f64).trunc() as usize)
            .unwrap_or(0)
    }

    pub fn is_inlinable(&self, function: &str) -> bool {
        matches!(
            ta_function_name(function),
            "sma" | "ema" | "rma" | "wma" | "stdev" | "atr" | "change" | "mom"
        )
    }

    /// Functions the runtime bar evaluator does not implement; inside a security call these
    /// are always inlined against the security context.
    pub fn requires_inline(&self, function: &str) -> bool {
        matches!(ta_function_name(function), "atr" | "stdev")
    }
}

fn parse_period(function: &str, arguments: &[Expr], position: usize) -> Result<usize, LowerError> {
    let period = find_argument(arguments, position, "length")
        .and_then(Expr::as_number)
        .ok_or_else(|| {
            LowerError::new(
                "CallExpression",
                format!("ta.{function} needs a numeric literal period"),
            )
        })?;
    check_period(function, period)
}

fn parse_period_or(
    function: &str,
    arguments: &[Expr],
    position: usize,
    default: usize,
) -> Result<usize, LowerError> {
    if find_argument(arguments, position, "length").is_none() {
        return Ok(default);
    }
    parse_period(function, arguments, position)
}

fn check_period(function: &str, period: f64) -> Result<usize, LowerError> {
    if period < 1.0 {
        return Err(LowerError::new(
            "CallExpression",
            format!("ta.{function} period must be at least 1, got {period}"),
        ));
    }
    if period > MAX_PERIOD as f64 {
        return Err(LowerError::new(
            "CallExpression",
            format!("ta.{function} period {period} exceeds the maximum of {MAX_PERIOD}"),
        ));
    }
    Ok(period.trunc() as usize)
}

fn parse_source(
    function: &str,
    arguments: &[Expr],
    series_source: &dyn Fn(&Expr) -> Option<Source>,
) -> Result<Source, LowerError> {
    let expr = find_argument(arguments, 0, "source").ok_or_else(|| {
        LowerError::new("CallExpression", format!("ta.{function} needs a source"))
    })?;
    Source::from_expr(expr)
        .or_else(|| series_source(expr))
        .ok_or_else(|| {
            LowerError::new(
                "CallExpression",
                format!(
                    "ta.{function} source must be a bar field, hl2/hlc3/ohlc4 or a float variable, got {}",
                    expr.variant_name()
                ),
            )
        })
}

/// Builds an inline generator whose source is a bar field or a price composite.
pub fn create_inline_indicator(
    function: &str,
    arguments: &[Expr],
) -> Result<Box<dyn InlineIndicator>, LowerError> {
    create_inline_indicator_with(function, arguments, &|_| None)
}

/// Like [`create_inline_indicator`], with `series_source` resolving any other source
/// expression (a variable with recorded history).
pub fn create_inline_indicator_with(
    function: &str,
    arguments: &[Expr],
    series_source: &dyn Fn(&Expr) -> Option<Source>,
) -> Result<Box<dyn InlineIndicator>, LowerError> {
    let function = ta_function_name(function);
    let source_of = |function: &str, arguments: &[Expr]| {
        parse_source(function, arguments, series_source)
    };
    match function {
        "sma" => Ok(Box::new(WindowIndicator::new(
            WindowKind::Sma,
            parse_period(function, arguments, 1)?,
            source_of(function, arguments)?,
        ))),
        "wma" => Ok(Box::new(WindowIndicator::new(
            WindowKind::Wma,
            parse_period(function, arguments, 1)?,
            source_of(function, arguments)?,
        ))),
        "stdev" => Ok(Box::new(WindowIndicator::new(
            WindowKind::Stdev,
            parse_period(function, arguments, 1)?,
            source_of(function, arguments)?,
        ))),
        "ema" => Ok(Box::new(RecurrentIndicator::new(
            Smoothing::Ema,
            parse_period(function, arguments, 1)?,
            RecurrentInput::Price(source_of(function, arguments)?),
        ))),
        "rma" => Ok(Box::new(RecurrentIndicator::new(
            Smoothing::Rma,
            parse_period(function, arguments, 1)?,
            RecurrentInput::Price(source_of(function, arguments)?),
        ))),
        "atr" => Ok(Box::new(RecurrentIndicator::new(
            Smoothing::Rma,
            parse_period(function, arguments, 0)?,
            RecurrentInput::TrueRange,
        ))),
        "change" => Ok(Box::new(DifferenceIndicator::change(
            parse_period_or(function, arguments, 1, 1)?,
            source_of(function, arguments)?,
        ))),
        "mom" => Ok(Box::new(DifferenceIndicator::momentum(
            parse_period_or(function, arguments, 1, 1)?,
            source_of(function, arguments)?,
        ))),
        other => Err(LowerError::new(
            "CallExpression",
            format!("ta.{other} has no inline implementation"),
        )),
    }
}
