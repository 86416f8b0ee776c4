use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(icon: &str, text: &str) {
    println!("{} {}", icon, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!("{} {}: {}", Icons::INFO, label.style(theme().dim.clone()), value);
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn score(value: f32) -> String {
    format!("{:.3}", value).style(theme().score.clone()).to_string()
}

/// `name [type]`
pub fn entity_label(name: &str, entity_type: &str) -> String {
    format!(
        "{} {}",
        name.style(theme().entity.clone()),
        dim(&format!("[{}]", entity_type))
    )
}

/// One subgraph node, indented by BFS level
pub fn node_line(level: usize, is_center: bool, name: &str, entity_type: &str, id: &str) {
    let icon = if is_center { Icons::CENTER } else { Icons::ENTITY };
    println!(
        "{}{} {} {}",
        "  ".repeat(level),
        icon,
        entity_label(name, entity_type),
        dim(id)
    );
}

/// `subject --predicate--> object`
pub fn edge_line(subject: &str, predicate: &str, object: &str, confidence: f32) {
    println!(
        "  {} {} --{}--> {} {}",
        Icons::LINK,
        subject,
        predicate.style(theme().predicate.clone()),
        object,
        dim(&format!("({:.2})", confidence))
    );
}
