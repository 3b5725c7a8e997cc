use serde_json::{Map, Value};

/// Parse the value of a "parameters grid" task input.
///
/// Accepts either a JSON object or the editor format `-key value -other 2`.
/// Editor values are kept as strings.
pub fn parse_list_input(list: &str) -> Result<Map<String, Value>, serde_json::Error> {
    let list = list.trim();

    if list.starts_with('{') {
        return serde_json::from_str(list);
    }

    let mut fields = Map::new();
    if !list.contains('-') {
        return Ok(fields);
    }

    for entry in list.split('-').skip(1) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (key, value) = entry.split_once(' ').unwrap_or((entry, ""));
        fields.insert(key.to_string(), Value::String(value.trim().to_string()));
    }

    Ok(fields)
}
