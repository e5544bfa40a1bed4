use std::{
    io::{stdout, Write},
    path::Path,
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use isslive::{
    transport::{ConnectionConfig, ReplayTransport},
    Catalog, Reading, Session,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::render::{render, render_json, Format};

/// Channels shown by `watch` when no names are given.
pub const DEFAULT_WATCH: &[&str] = &[
    "gmt_time",
    "cabin_pressure",
    "cabin_temperature",
    "solar_beta_angle",
    "cmgs_online_count",
    "cmg_1_online",
    "attitude_roll_error",
    "state_vector_x_pos",
    "state_vector_y_pos",
    "state_vector_z_pos",
    "lab_ppo2",
    "lab_ppn2",
    "lab_ppco2",
];

/// Upper bound on waiting for an unpaced replay to finish.
const REPLAY_TIMEOUT: Duration = Duration::from_secs(3600);

fn check_names(catalog: &Catalog, names: &[String]) -> Result<()> {
    let unknown: Vec<&str> = names
        .iter()
        .filter(|n| !catalog.contains(n))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        bail!("unknown channel names: {}", unknown.join(", "));
    }
    Ok(())
}

fn start<P: AsRef<Path>>(
    catalog: Catalog,
    input: P,
    pace: Option<Duration>,
) -> Result<Session> {
    let path = input.as_ref();
    let mut transport = ReplayTransport::open(path)
        .with_context(|| format!("opening recording {:?}", path.to_path_buf()))?;
    if let Some(pace) = pace {
        transport = transport.with_pace(pace);
    }
    let mut session = Session::new(catalog);
    session
        .connect(transport, &ConnectionConfig::default())
        .context("starting replay")?;
    Ok(session)
}

#[derive(Serialize)]
struct ReadingsRenderData<'a> {
    time: DateTime<Utc>,
    readings: Vec<Reading<'a>>,
}

fn readings<'a>(session: &'a Session, names: &[String]) -> Vec<Reading<'a>> {
    if names.is_empty() {
        return session
            .read_all()
            .into_iter()
            .filter(|r| r.value.is_some())
            .collect();
    }
    names
        .iter()
        .filter_map(|n| session.catalog().lookup(n))
        .map(|c| session.read(c))
        .collect()
}

fn render_readings(session: &Session, names: &[String], format: &Format) -> Result<String> {
    let data = ReadingsRenderData {
        time: Utc::now(),
        readings: readings(session, names),
    };
    match format {
        Format::Json => render_json(&data),
        Format::Text => render(READINGS_TEMPLATE, &data),
    }
}

/// Replay a recorded feed and print the final value of each channel.
pub fn replay<P: AsRef<Path>>(
    catalog: Catalog,
    input: P,
    names: &[String],
    format: &Format,
) -> Result<()> {
    check_names(&catalog, names)?;
    let mut session = start(catalog, input, None)?;
    if !session.wait_idle(REPLAY_TIMEOUT) {
        warn!("replay did not finish in {REPLAY_TIMEOUT:?}; showing values so far");
    }
    session.disconnect();
    info!(updates = session.store().update_count(), "replay complete");

    let output = render_readings(&session, names, format)?;
    stdout()
        .write_all(output.as_bytes())
        .context("writing to stdout")
}

/// Replay a recorded feed at `pace` per update, printing `names` every `interval`.
pub fn watch<P: AsRef<Path>>(
    catalog: Catalog,
    input: P,
    names: &[String],
    interval: Duration,
    pace: Duration,
) -> Result<()> {
    let names: Vec<String> = if names.is_empty() {
        DEFAULT_WATCH.iter().map(ToString::to_string).collect()
    } else {
        names.to_vec()
    };
    check_names(&catalog, &names)?;

    let mut session = start(catalog, input, Some(pace))?;
    let mut out = stdout();
    loop {
        let streaming = session.is_streaming();
        let output = render_readings(&session, &names, &Format::Text)?;
        out.write_all(output.as_bytes())
            .context("writing to stdout")?;
        out.flush().context("flushing stdout")?;
        if !streaming {
            break;
        }
        thread::sleep(interval);
    }
    session.disconnect();
    info!(updates = session.store().update_count(), "feed ended");
    Ok(())
}

const READINGS_TEMPLATE: &str = r#"-------------------------------------------------------------------------------------------
{{ time }}
-------------------------------------------------------------------------------------------
{{ #each readings ~}}
{{ rpad 30 channel.name }} {{ lpad 20 value }}  {{ channel.unit }}
{{ /each ~}}
"#;

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_check_names() {
        let catalog = Catalog::default();
        let names: Vec<String> = DEFAULT_WATCH.iter().map(ToString::to_string).collect();
        check_names(&catalog, &names).unwrap();

        let err = check_names(&catalog, &["cabin_presure".to_string()]).unwrap_err();
        assert!(err.to_string().contains("cabin_presure"));
    }

    #[test]
    fn test_replay_readings() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("feed.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"item": "USLAB000058", "fields": {"Value": "758.2"}}"#,
                "\n",
                r#"{"item": "USLAB000001", "fields": {"Value": "1"}}"#,
                "\n",
            ),
        )
        .unwrap();

        let mut session = start(Catalog::default(), &path, None).unwrap();
        assert!(session.wait_idle(Duration::from_secs(10)));
        session.disconnect();

        let names = vec!["cabin_pressure".to_string(), "cmg_1_online".to_string()];
        let out = render_readings(&session, &names, &Format::Text).unwrap();
        assert!(out.contains("758.2"), "{out}");
        assert!(out.contains("IN USE"), "{out}");

        // without names only channels with data are shown
        let out = render_readings(&session, &[], &Format::Text).unwrap();
        assert_eq!(out.lines().count(), 5, "{out}");

        let out = render_readings(&session, &names, &Format::Json).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["readings"][0]["channel"]["name"], "cabin_pressure");
        assert_eq!(json["readings"][0]["value"], 758.2);
        assert_eq!(json["readings"][1]["value"], "IN USE");
    }
}
