use tabled::{settings::Style, Table, Tabled};

use crate::storage::{BackendStatus, DbStats};
use crate::search::SearchResult;

#[derive(Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct SearchRow {
    #[tabled(rename = "#")]
    pub rank: usize,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Title")]
    pub title: String,
    #[tabled(rename = "Score")]
    pub score: String,
    #[tabled(rename = "Id")]
    pub id: String,
}

#[derive(Tabled)]
pub struct RecordRow {
    #[tabled(rename = "Id")]
    pub id: String,
    #[tabled(rename = "Label")]
    pub label: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
    #[tabled(rename = "Updated")]
    pub updated: String,
}

#[derive(Tabled)]
pub struct HealthRow {
    #[tabled(rename = "Backend")]
    pub backend: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
    #[tabled(rename = "Latency (ms)")]
    pub latency_ms: u64,
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn stats_table(stats: &DbStats) -> String {
    let rows: Vec<MetricRow> = [
        ("Entities", stats.entities),
        ("Relations", stats.relations),
        ("News events", stats.news_events),
        ("Vector records", stats.vectors),
    ]
    .into_iter()
    .map(|(metric, value)| MetricRow {
        metric: metric.to_string(),
        value: value.to_string(),
    })
    .collect();
    render(&rows)
}

pub fn search_table(results: &[SearchResult]) -> String {
    let rows: Vec<SearchRow> = results
        .iter()
        .enumerate()
        .map(|(i, r)| SearchRow {
            rank: i + 1,
            kind: r.payload.content_type().to_string(),
            title: r.payload.title().to_string(),
            score: format!("{:.3}", r.score),
            id: r.id().to_string(),
        })
        .collect();
    render(&rows)
}

pub fn record_table(rows: &[RecordRow]) -> String {
    render(rows)
}

pub fn health_table(backends: &[(&str, &BackendStatus)]) -> String {
    let rows: Vec<HealthRow> = backends
        .iter()
        .map(|(name, status)| HealthRow {
            backend: name.to_string(),
            status: if status.healthy { "up".into() } else { "down".into() },
            detail: status.detail.clone(),
            latency_ms: status.latency_ms,
        })
        .collect();
    render(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::search::SearchPayload;

    #[test]
    fn test_stats_table_lists_every_count() {
        let stats = DbStats {
            entities: 3,
            relations: 2,
            news_events: 1,
            vectors: 4,
        };
        let table = stats_table(&stats);
        assert!(table.contains("Entities"));
        assert!(table.contains("Vector records"));
        assert!(table.contains('4'));
    }

    #[test]
    fn test_search_table() {
        let results = vec![SearchResult::new(
            SearchPayload::Entity(Entity::new("苹果", "公司").with_id("e1")),
            0.75,
        )];
        let table = search_table(&results);
        assert!(table.contains("苹果"));
        assert!(table.contains("0.750"));
        assert!(table.contains("e1"));
    }

    #[test]
    fn test_empty_rows_render_nothing() {
        assert!(search_table(&[]).is_empty());
        assert!(record_table(&[]).is_empty());
    }
}
