use std::{
    io::{stdout, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use isslive::{Catalog, Channel};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::render::{render, render_json, Format};

/// Load the built-in catalog, or the catalog at `path` merged with the built-ins.
pub fn load_catalog<P: AsRef<Path>>(path: Option<P>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::with_file(&path, true).with_context(|| {
            format!("loading channel db from {:?}", path.as_ref().to_path_buf())
        }),
        None => Ok(Catalog::default()),
    }
}

#[derive(Serialize)]
struct ChannelsRenderData<'a> {
    version: &'a str,
    channels: Vec<&'a Channel>,
}

fn select<'a>(
    catalog: &'a Catalog,
    subsystem: Option<&str>,
    pattern: Option<&Regex>,
) -> Vec<&'a Channel> {
    catalog
        .all()
        .iter()
        .filter(|c| {
            subsystem.is_none_or(|want| {
                c.subsystem()
                    .is_some_and(|s| s.eq_ignore_ascii_case(want))
            })
        })
        .filter(|c| pattern.is_none_or(|rx| rx.is_match(c.name()) || rx.is_match(c.id())))
        .collect()
}

pub fn list_channels<P: AsRef<Path>>(
    db: Option<P>,
    subsystem: Option<&str>,
    pattern: Option<&str>,
    format: &Format,
) -> Result<()> {
    let catalog = load_catalog(db)?;
    let pattern = pattern
        .map(Regex::new)
        .transpose()
        .context("invalid --match pattern")?;

    let channels = select(&catalog, subsystem, pattern.as_ref());
    debug!(selected = channels.len(), total = catalog.len(), "channels");

    let data = ChannelsRenderData {
        version: catalog.version(),
        channels,
    };
    let output = match format {
        Format::Json => render_json(&data),
        Format::Text => render(CHANNELS_TEMPLATE, &data),
    }?;
    stdout()
        .write_all(output.as_bytes())
        .context("writing to stdout")
}

#[derive(Serialize)]
struct CodeRenderData<'a> {
    code: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct ChannelRenderData<'a> {
    channel: &'a Channel,
    aliases: Vec<&'a str>,
    table: Option<&'a str>,
    codes: Vec<CodeRenderData<'a>>,
}

pub fn channel_info<P: AsRef<Path>>(db: Option<P>, name: &str) -> Result<()> {
    let catalog = load_catalog(db)?;
    let Some(channel) = catalog.lookup(name) else {
        bail!("No channel found for name={name}");
    };

    let table = channel.decode_table();
    let data = ChannelRenderData {
        channel,
        aliases: catalog
            .aliases()
            .iter()
            .filter(|(_, target)| target.as_str() == channel.name())
            .map(|(alias, _)| alias.as_str())
            .collect(),
        table: table.map(|t| t.name()),
        codes: table
            .map(|t| {
                t.codes()
                    .map(|(code, text)| CodeRenderData { code, text })
                    .collect()
            })
            .unwrap_or_default(),
    };
    let output = render(CHANNEL_TEMPLATE, &data)?;
    stdout()
        .write_all(output.as_bytes())
        .context("writing to stdout")
}

const CHANNELS_TEMPLATE: &str = r#"Channel DB {{ version }}
-------------------------------------------------------------------------------------------
Name                           ID               Kind      Subsystem
-------------------------------------------------------------------------------------------
{{ #each channels ~}}
{{ rpad 30 name }} {{ rpad 16 id }} {{ rpad 9 kind }} {{ subsystem }}
{{ /each ~}}
"#;

const CHANNEL_TEMPLATE: &str = r#"===========================================================================================
Channel {{ channel.name }}
===========================================================================================
  ID:          {{ channel.id }}
  Kind:        {{ channel.kind }}
  Description: {{ channel.description }}
  Subsystem:   {{ channel.subsystem }}
{{ #if channel.unit }}  Unit:        {{ channel.unit }}
{{ /if ~}}
{{ #if aliases }}  Aliases:     {{ join aliases ", " }}
{{ /if ~}}
{{ #if table ~}}
-------------------------------------------------------------------------------------------
Decode table {{ table }}
-------------------------------------------------------------------------------------------
{{ #each codes ~}}
{{ lpad 6 code }}  {{ text }}
{{ /each ~}}
{{ /if ~}}
"#;
