pub struct Icons;

impl Icons {
    pub const GRAPH: &str = "🕸️";
    pub const SEARCH: &str = "🔍";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const LINK: &str = "🔗";
    pub const ENTITY: &str = "🔵";
    pub const CENTER: &str = "⭐";
    pub const NEWS: &str = "📰";
    pub const DATABASE: &str = "🗄️";
    pub const BROOM: &str = "🧹";
    pub const HEART: &str = "💓";
}
