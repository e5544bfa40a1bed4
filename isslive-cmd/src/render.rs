use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

fn to_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.to_owned(),
        serde_json::Value::Null => "-".to_string(),
        _ => v.to_string(),
    }
}

fn pad(num: u64, v: &serde_json::Value, left: bool) -> String {
    let v = to_text(v);
    let width = usize::try_from(num).unwrap_or(usize::MAX);
    if left {
        format!("{v:>width$}")
    } else {
        format!("{v:<width$}")
    }
}

fn setup_handlebars() -> handlebars::Handlebars<'static> {
    let mut hb = handlebars::Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);

    handlebars_helper!(join: |arr: array, sep: str| {
        let strings: Vec<String> = arr.iter().filter_map(|v| {
            match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None
            }
        }).collect();

        strings.join(sep)
    });
    hb.register_helper("join", Box::new(join));

    handlebars_helper!(left_pad: |num: u64, v: Json| pad(num, v, true));
    hb.register_helper("lpad", Box::new(left_pad));

    handlebars_helper!(right_pad: |num: u64, v: Json| pad(num, v, false));
    hb.register_helper("rpad", Box::new(right_pad));

    hb
}

/// Render `data` with a handlebars `template`.
pub fn render<T: Serialize>(template: &str, data: &T) -> Result<String> {
    let mut hb = setup_handlebars();

    hb.register_template_string("template", template)
        .context("registering template")?;

    hb.render("template", data).context("rendering text")
}

pub fn render_json<T: Serialize>(data: &T) -> Result<String> {
    let mut s = serde_json::to_string_pretty(data).context("serializing to json")?;
    s.push('\n');
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_padding() {
        let out = render(
            "[{{ lpad 5 a }}][{{ rpad 5 b }}][{{ rpad 2 c }}][{{ lpad 3 d }}]",
            &json!({"a": 1.5, "b": "x", "c": "long", "d": null}),
        )
        .unwrap();
        assert_eq!(out, "[  1.5][x    ][long][  -]");
    }

    #[test]
    fn test_join() {
        let out = render("{{ join names \", \" }}", &json!({"names": ["a", "b"]})).unwrap();
        assert_eq!(out, "a, b");
    }
}
