pub mod feature;
pub mod plugin;

pub use feature::{FEATURE_ID, MIN_SELECTION_CHARS, SELECTED_TEXT, TextSummaryFeature};
pub use plugin::{PLUGIN_ID, TextSummaryPlugin};
