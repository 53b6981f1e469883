use crate::ast::Expr;

/// OHLCV field of the runtime bar struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Time,
}

impl BarField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(BarField::Open),
            "high" => Some(BarField::High),
            "low" => Some(BarField::Low),
            "close" => Some(BarField::Close),
            "volume" => Some(BarField::Volume),
            "time" => Some(BarField::Time),
            _ => None,
        }
    }

    pub fn go_field(&self) -> &'static str {
        match self {
            BarField::Open => "Open",
            BarField::High => "High",
            BarField::Low => "Low",
            BarField::Close => "Close",
            BarField::Volume => "Volume",
            BarField::Time => "Time",
        }
    }

    /// `ctx.Data[<index>].<Field>`
    pub fn at(&self, index: &str) -> String {
        format!("ctx.Data[{index}].{}", self.go_field())
    }
}

/// Price source of an inlined indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Field(BarField),
    Hl2,
    Hlc3,
    Ohlc4,
    /// Float variable with recorded history, read through its `<name>_at(k)` accessor.
    Series(String),
}

impl Source {
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        expr.as_identifier().and_then(Self::from_name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hl2" => Some(Source::Hl2),
            "hlc3" => Some(Source::Hlc3),
            "ohlc4" => Some(Source::Ohlc4),
            // time is a timestamp, never a price source
            "time" => None,
            _ => BarField::from_name(name).map(Source::Field),
        }
    }

    /// Source value at bar `index` (a Go integer expression).
    pub fn at(&self, index: &str) -> String {
        match self {
            Source::Field(field) => field.at(index),
            Source::Hl2 => format!(
                "({} + {}) / 2",
                BarField::High.at(index),
                BarField::Low.at(index)
            ),
            Source::Hlc3 => format!(
                "({} + {} + {}) / 3",
                BarField::High.at(index),
                BarField::Low.at(index),
                BarField::Close.at(index)
            ),
            Source::Ohlc4 => format!(
                "({} + {} + {} + {}) / 4",
                BarField::Open.at(index),
                BarField::High.at(index),
                BarField::Low.at(index),
                BarField::Close.at(index)
            ),
            Source::Series(name) => format!("{}({index})", series_accessor(name)),
        }
    }
}

/// Slice holding one value per completed bar of a variable.
pub fn series_history(name: &str) -> String {
    format!("{name}_hist")
}

/// Closure returning a variable's value at any bar up to the current one.
pub fn series_accessor(name: &str) -> String {
    format!("{name}_at")
}

/// Strips the `ta.` namespace: `ta.sma` and `sma` both name `sma`.
pub fn ta_function_name(callee: &str) -> &str {
    callee.strip_prefix("ta.").unwrap_or(callee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ident, int};

    #[test]
    fn test_bar_field_access() {
        assert_eq!(BarField::Close.at("ctx.BarIndex"), "ctx.Data[ctx.BarIndex].Close");
        assert_eq!(BarField::Time.at("k"), "ctx.Data[k].Time");
        assert_eq!(BarField::from_name("volume"), Some(BarField::Volume));
        assert_eq!(BarField::from_name("vwap"), None);
    }

    #[test]
    fn test_composite_sources() {
        let hl2 = Source::from_expr(&ident("hl2")).unwrap();
        assert_eq!(
            hl2.at("k"),
            "(ctx.Data[k].High + ctx.Data[k].Low) / 2"
        );
        assert_eq!(Source::from_expr(&ident("time")), None);
        assert_eq!(Source::from_expr(&int(3)), None);
        assert_eq!(
            Source::from_expr(&ident("open")),
            Some(Source::Field(BarField::Open))
        );
    }

    #[test]
    fn test_series_source() {
        let src = Source::Series("basis".to_string());
        assert_eq!(src.at("ctx.BarIndex-j"), "basis_at(ctx.BarIndex-j)");
        assert_eq!(series_history("basis"), "basis_hist");
    }

    #[test]
    fn test_ta_function_name() {
        assert_eq!(ta_function_name("ta.stdev"), "stdev");
        assert_eq!(ta_function_name("atr"), "atr");
    }
}
