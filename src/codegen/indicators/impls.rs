use crate::codegen::emitter::CodeBuffer;
use crate::codegen::indicators::registry::InlineIndicator;
use crate::codegen::indicators::utils::{BarField, Source};

fn nan_branch(target: &str, out: &mut CodeBuffer) {
    out.line(&format!("{target} = math.NaN()"));
}

// Windowed indicators: SMA, WMA, STDEV

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Sma,
    Wma,
    Stdev,
}

pub struct WindowIndicator {
    kind: WindowKind,
    length: usize,
    source: Source,
}

impl WindowIndicator {
    pub fn new(kind: WindowKind, length: usize, source: Source) -> Self {
        Self {
            kind,
            length,
            source,
        }
    }

    fn window_sum(&self, out: &mut CodeBuffer) {
        out.line("sum := 0.0");
        out.open(&format!("for j := 0; j < {}; j++ {{", self.length));
        out.line(&format!("sum += {}", self.source.at("ctx.BarIndex-j")));
        out.close("}");
    }
}

impl InlineIndicator for WindowIndicator {
    fn name(&self) -> &'static str {
        match self.kind {
            WindowKind::Sma => "SMA",
            WindowKind::Wma => "WMA",
            WindowKind::Stdev => "STDEV",
        }
    }

    fn period(&self) -> usize {
        self.length
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1)
    }

    fn state(&self, _target: &str) -> Vec<String> {
        Vec::new()
    }

    fn emit(&self, target: &str, out: &mut CodeBuffer) {
        let n = self.length;
        out.line(&format!("/* Inline {}({n}) */", self.name()));
        if self.warmup() > 0 {
            out.open(&format!("if ctx.BarIndex < {} {{", self.warmup()));
            nan_branch(target, out);
            out.else_branch("} else {");
        } else {
            out.open("{");
        }

        match self.kind {
            WindowKind::Sma => {
                self.window_sum(out);
                out.line(&format!("{target} = sum / {n}.0"));
            }
            WindowKind::Wma => {
                out.line("weightedSum := 0.0");
                out.open(&format!("for j := 0; j < {n}; j++ {{"));
                out.line(&format!(
                    "weightedSum += {} * float64({n}-j)",
                    self.source.at("ctx.BarIndex-j")
                ));
                out.close("}");
                let weights = n.saturating_mul(n.saturating_add(1)) / 2;
                out.line(&format!("{target} = weightedSum / {weights}.0"));
            }
            WindowKind::Stdev => {
                self.window_sum(out);
                out.line(&format!("mean := sum / {n}.0"));
                out.line("variance := 0.0");
                out.open(&format!("for j := 0; j < {n}; j++ {{"));
                out.line(&format!(
                    "diff := {} - mean",
                    self.source.at("ctx.BarIndex-j")
                ));
                out.line("variance += diff * diff");
                out.close("}");
                out.line(&format!("{target} = math.Sqrt(variance / {n}.0)"));
            }
        }
        out.close("}");
    }
}

// Recurrent indicators: EMA, RMA, ATR

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Smoothing {
    /// alpha = 2 / (N + 1)
    Ema,
    /// alpha = 1 / N (Wilder)
    Rma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurrentInput {
    Price(Source),
    /// max(high-low, |high-prevClose|, |low-prevClose|)
    TrueRange,
}

impl RecurrentInput {
    /// First bar with a defined input value.
    fn first_bar(&self) -> usize {
        match self {
            RecurrentInput::Price(_) => 0,
            RecurrentInput::TrueRange => 1,
        }
    }

    fn value_at(&self, index: &str) -> String {
        match self {
            RecurrentInput::Price(source) => source.at(index),
            RecurrentInput::TrueRange => {
                let prev_close = BarField::Close.at(&format!("{index}-1"));
                format!(
                    "math.Max({} - {}, math.Max(math.Abs({} - {prev_close}), math.Abs({} - {prev_close})))",
                    BarField::High.at(index),
                    BarField::Low.at(index),
                    BarField::High.at(index),
                    BarField::Low.at(index),
                )
            }
        }
    }
}

/// SMA-seeded recurrence with previous-value state hoisted out of the bar loop.
///
/// `<target>_prev`/`<target>_bar` cache the last computed value and the bar it belongs to.
/// The next bar steps the recurrence once; any other access replays it from the first bar,
/// so the block is exact when `ctx` is a security context addressed out of order.
pub struct RecurrentIndicator {
    smoothing: Smoothing,
    length: usize,
    input: RecurrentInput,
}

impl RecurrentIndicator {
    pub fn new(smoothing: Smoothing, length: usize, input: RecurrentInput) -> Self {
        Self {
            smoothing,
            length,
            input,
        }
    }

    fn alpha(&self) -> String {
        match self.smoothing {
            Smoothing::Ema => format!("2.0 / float64({}+1)", self.length),
            Smoothing::Rma => format!("1.0 / {}", self.length),
        }
    }

    fn current_value(&self, out: &mut CodeBuffer) -> &'static str {
        match &self.input {
            RecurrentInput::Price(source) => {
                out.line(&format!("cur := {}", source.at("ctx.BarIndex")));
                "cur"
            }
            RecurrentInput::TrueRange => {
                let high = BarField::High.at("ctx.BarIndex");
                let low = BarField::Low.at("ctx.BarIndex");
                let prev_close = BarField::Close.at("ctx.BarIndex-1");
                out.line(&format!("hl := {high} - {low}"));
                out.line(&format!("hc := math.Abs({high} - {prev_close})"));
                out.line(&format!("lc := math.Abs({low} - {prev_close})"));
                out.line("tr := math.Max(hl, math.Max(hc, lc))");
                "tr"
            }
        }
    }
}

impl InlineIndicator for RecurrentIndicator {
    fn name(&self) -> &'static str {
        match (&self.input, self.smoothing) {
            (RecurrentInput::TrueRange, _) => "ATR",
            (RecurrentInput::Price(_), Smoothing::Ema) => "EMA",
            (RecurrentInput::Price(_), Smoothing::Rma) => "RMA",
        }
    }

    fn period(&self) -> usize {
        self.length
    }

    fn warmup(&self) -> usize {
        self.input
            .first_bar()
            .saturating_add(self.length)
            .saturating_sub(1)
    }

    fn state(&self, target: &str) -> Vec<String> {
        vec![
            format!("{target}_prev := math.NaN()"),
            format!("{target}_bar := -1"),
        ]
    }

    fn emit(&self, target: &str, out: &mut CodeBuffer) {
        let n = self.length;
        let first = self.input.first_bar();
        let warmup = self.warmup();
        let prev = format!("prev{}", self.name());

        out.line(&format!("/* Inline {}({n}) */", self.name()));
        let mut guarded = false;
        if first > 0 {
            out.open(&format!("if ctx.BarIndex < {first} {{"));
            nan_branch(target, out);
            guarded = true;
        }
        if warmup > first {
            if guarded {
                out.else_branch(&format!("}} else if ctx.BarIndex < {warmup} {{"));
            } else {
                out.open(&format!("if ctx.BarIndex < {warmup} {{"));
            }
            nan_branch(target, out);
            guarded = true;
        }
        if guarded {
            out.else_branch(&format!("}} else if {target}_bar == ctx.BarIndex {{"));
        } else {
            out.open(&format!("if {target}_bar == ctx.BarIndex {{"));
        }
        out.line(&format!("{target} = {target}_prev"));
        out.else_branch("} else {");

        out.line(&format!("alpha := {}", self.alpha()));
        let current = self.current_value(out);
        out.line(&format!("{prev} := {target}_prev"));
        out.line("seed := 0.0");

        out.open(&format!("if {target}_bar != ctx.BarIndex-1 {{"));
        if first > 0 {
            out.open(&format!("for j := ctx.BarIndex - {first}; j >= 1; j-- {{"));
        } else {
            out.open("for j := ctx.BarIndex; j >= 1; j-- {");
        }
        out.line("k := ctx.BarIndex - j");
        out.line(&format!("v := {}", self.input.value_at("k")));
        out.open(&format!("if k < {warmup} {{"));
        out.line("seed += v");
        out.else_branch(&format!("}} else if k == {warmup} {{"));
        out.line(&format!("{prev} = (seed + v) / {n}.0"));
        out.else_branch("} else {");
        out.line(&format!("{prev} += alpha * (v - {prev})"));
        out.close("}");
        out.close("}");
        out.close("}");

        out.open(&format!("if ctx.BarIndex == {warmup} {{"));
        out.line(&format!("{target} = (seed + {current}) / {n}.0"));
        out.else_branch("} else {");
        out.line(&format!("{target} = {prev} + alpha*({current}-{prev})"));
        out.close("}");
        out.line(&format!("{target}_prev = {target}"));
        out.line(&format!("{target}_bar = ctx.BarIndex"));
        out.close("}");
    }
}

// Bar-over-bar difference: CHANGE, MOM

/// `source - source[length]`, NaN until `length` bars of history exist.
pub struct DifferenceIndicator {
    label: &'static str,
    length: usize,
    source: Source,
}

impl DifferenceIndicator {
    pub fn change(length: usize, source: Source) -> Self {
        Self {
            label: "CHANGE",
            length,
            source,
        }
    }

    pub fn momentum(length: usize, source: Source) -> Self {
        Self {
            label: "MOM",
            length,
            source,
        }
    }
}

impl InlineIndicator for DifferenceIndicator {
    fn name(&self) -> &'static str {
        self.label
    }

    fn period(&self) -> usize {
        self.length
    }

    fn warmup(&self) -> usize {
        self.length
    }

    fn state(&self, _target: &str) -> Vec<String> {
        Vec::new()
    }

    fn emit(&self, target: &str, out: &mut CodeBuffer) {
        let n = self.length;
        out.line(&format!("/* Inline {}({n}) */", self.name()));
        out.open(&format!("if ctx.BarIndex < {n} {{"));
        nan_branch(target, out);
        out.else_branch("} else {");
        out.line(&format!(
            "{target} = {} - {}",
            self.source.at("ctx.BarIndex"),
            self.source.at(&format!("ctx.BarIndex-{n}"))
        ));
        out.close("}");
    }
}

// Crossings: CROSSOVER, CROSSUNDER

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossDirection {
    Over,
    Under,
}

/// Boolean crossing of two operands already lowered to locals.
///
/// The previous operand values live in hoisted `<target>_pa`/`<target>_pb`, so the first bar
/// compares against NaN and yields false.
pub struct CrossIndicator {
    direction: CrossDirection,
}

impl CrossIndicator {
    pub fn new(direction: CrossDirection) -> Self {
        Self { direction }
    }

    pub fn name(&self) -> &'static str {
        match self.direction {
            CrossDirection::Over => "CROSSOVER",
            CrossDirection::Under => "CROSSUNDER",
        }
    }

    pub fn state(&self, target: &str) -> Vec<String> {
        vec![
            format!("{target}_pa := math.NaN()"),
            format!("{target}_pb := math.NaN()"),
        ]
    }

    pub fn emit(&self, target: &str, a: &str, b: &str, out: &mut CodeBuffer) {
        let (now, before) = match self.direction {
            CrossDirection::Over => (">", "<="),
            CrossDirection::Under => ("<", ">="),
        };
        out.line(&format!("/* Inline {} */", self.name()));
        out.line(&format!(
            "{target} := {a} {now} {b} && {target}_pa {before} {target}_pb"
        ));
        out.line(&format!("{target}_pa, {target}_pb = {a}, {b}"));
    }
}
