pub fn pluralize(count: usize, singular: &str, plural: Option<&str>) -> String {
    let word = if count == 1 {
        singular.to_string()
    } else {
        match plural {
            Some(p) => p.to_string(),
            None => format!("{singular}s"),
        }
    };
    format!("{count} {word}")
}
