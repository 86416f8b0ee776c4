//! Lexical name similarity and type compatibility

use crate::entity::Entity;

/// Lower-case and collapse runs of whitespace
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dice coefficient over character bigrams of two normalized names
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = normalize(a);
    let b = normalize(b);
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }
    if a.chars().count() < 2 || b.chars().count() < 2 {
        return 0.0;
    }
    strsim::sorensen_dice(&a, &b) as f32
}

/// Best similarity over every pair of names the two entities go by
pub fn lexical_similarity(a: &Entity, b: &Entity) -> f32 {
    a.all_names()
        .flat_map(|x| b.all_names().map(move |y| name_similarity(x, y)))
        .fold(0.0f32, f32::max)
}

/// Which entity type labels may denote the same kind of thing
#[derive(Debug, Clone, Default)]
pub struct TypeCompatibility {
    groups: Vec<Vec<String>>,
}

impl TypeCompatibility {
    pub fn new(groups: &[Vec<String>]) -> Self {
        Self {
            groups: groups
                .iter()
                .map(|g| g.iter().map(|t| normalize(t)).collect())
                .collect(),
        }
    }

    /// Equal labels, labels sharing a group, or an unknown label on either side
    pub fn compatible(&self, a: &str, b: &str) -> bool {
        let a = normalize(a);
        let b = normalize(b);
        if a == b || is_unknown(&a) || is_unknown(&b) {
            return true;
        }
        self.groups
            .iter()
            .any(|group| group.contains(&a) && group.contains(&b))
    }
}

fn is_unknown(label: &str) -> bool {
    label.is_empty() || label == "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Apple   Inc\t"), "apple inc");
    }

    #[test]
    fn test_name_similarity() {
        assert_eq!(name_similarity("Apple", "apple"), 1.0);
        assert_eq!(name_similarity("苹果", "苹果"), 1.0);
        assert_eq!(name_similarity("Apple", "Banana"), 0.0);
        assert_eq!(name_similarity("A", "B"), 0.0);
        assert_eq!(name_similarity("", ""), 0.0);

        // "appleinc" has 7 bigrams, "apple" 4, sharing all 4
        let partial = name_similarity("Apple Inc", "Apple");
        assert!((partial - 8.0 / 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_lexical_similarity_uses_aliases() {
        let a = Entity::new("苹果公司", "公司").with_alias("Apple");
        let b = Entity::new("Apple", "公司");
        assert_eq!(lexical_similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_type_compatibility() {
        let types = TypeCompatibility::new(&[vec!["公司".into(), "组织".into()]]);
        assert!(types.compatible("公司", "公司"));
        assert!(types.compatible("公司", "组织"));
        assert!(types.compatible("公司", "unknown"));
        assert!(types.compatible("", "食物"));
        assert!(!types.compatible("公司", "食物"));
    }
}
