pub mod analyzer;

pub use analyzer::{
    analyze_program, canonical_timeframe, extract_max_period, is_security_call,
    parse_security_call, SecurityCall, SecurityKey, SymbolRef,
};
