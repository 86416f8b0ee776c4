use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub warn: Style,
    pub dim: Style,
    /// Entity names
    pub entity: Style,
    /// Relation predicates
    pub predicate: Style,
    /// Scores and confidences
    pub score: Style,
}

impl Theme {
    /// Colors on a terminal, plain text when piped
    pub fn detect() -> Self {
        if console::Term::stdout().is_term() {
            Self::colored()
        } else {
            Self::plain()
        }
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            warn: Style::new().yellow().bold(),
            dim: Style::new().bright_black(),
            entity: Style::new().blue().bold(),
            predicate: Style::new().magenta(),
            score: Style::new().green(),
        }
    }

    pub fn plain() -> Self {
        Self {
            header: Style::new(),
            success: Style::new(),
            warn: Style::new(),
            dim: Style::new(),
            entity: Style::new(),
            predicate: Style::new(),
            score: Style::new(),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
