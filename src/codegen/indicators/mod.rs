pub mod impls;
pub mod registry;
pub mod utils;


pub use impls::*;
pub use registry::{
    create_inline_indicator, create_inline_indicator_with, IndicatorRegistry, InlineIndicator,
    MAX_PERIOD,
};
pub use utils::{series_accessor, series_history, ta_function_name, BarField, Source};
