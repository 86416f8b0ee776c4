pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, edge_line, entity_label, header, info, node_line, score, section, success, warn};
pub use table::{health_table, record_table, search_table, stats_table, RecordRow};
pub use theme::{theme, Theme};
