// src/main.rs
//
// Feed dump tool: load a template definition, walk a capture file of framed
// FAST messages, decode each one, and report counts. Decode errors drop the
// message and carry on unless the config says otherwise.

use anyhow::Context;
use fastfeed::config::{AppConfig, Framing};
use fastfeed::decoder::Decoder;
use fastfeed::{loader, metrics};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

fn main() -> anyhow::Result<()> {
    let cfg_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load config before the logger to allow the JSON formatting choice
    let cfg = AppConfig::from_file(&cfg_path)
        .with_context(|| format!("load config {:?}", cfg_path))?;

    if cfg.general.json_logs {
        let mut b = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        );
        b.format(|buf, record| {
            use std::io::Write;
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                ts,
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        })
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("loaded config: {:?}", cfg);

    let store = loader::load_file(Path::new(&cfg.templates.path))
        .with_context(|| format!("load templates {}", cfg.templates.path))?;
    info!(
        "loaded {} template(s) from {}: ids {:?}",
        store.len(),
        cfg.templates.path,
        store.ids().collect::<Vec<_>>()
    );

    if let Some(m) = &cfg.metrics {
        metrics::spawn_http(m.bind.clone());
    }

    let data = std::fs::read(&cfg.input.path)
        .with_context(|| format!("read capture {}", cfg.input.path))?;
    let mut decoder = Decoder::new(store);

    let started = Instant::now();
    let (messages, errors) = match cfg.input.framing {
        Framing::Single => run_frames(&mut decoder, std::iter::once(&data[..]), &cfg)?,
        Framing::LengthPrefixed => {
            let frames = split_length_prefixed(&data, cfg.general.max_message_size as usize)?;
            run_frames(&mut decoder, frames.into_iter(), &cfg)?
        }
    };

    info!(
        "done: {} messages, {} errors in {:.3}s",
        messages,
        errors,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_frames<'a>(
    decoder: &mut Decoder,
    frames: impl Iterator<Item = &'a [u8]>,
    cfg: &AppConfig,
) -> anyhow::Result<(u64, u64)> {
    let mut messages: u64 = 0;
    let mut errors: u64 = 0;

    for frame in frames {
        let t0 = Instant::now();
        match decoder.decode(frame) {
            Ok(msg) => {
                metrics::inc_message(msg.len(), frame.len());
                messages += 1;
                debug!("template {}: {} field(s)", msg.template_id, msg.len());
                if let Some(every) = cfg.general.report_every {
                    if messages % every == 0 {
                        info!("decoded {} messages ({} errors)", messages, errors);
                    }
                }
            }
            Err(e) => {
                metrics::inc_decode_error(e.kind.label());
                errors += 1;
                if cfg.general.stop_on_error {
                    error!("message {}: {e}", messages + errors);
                    return Err(e.into());
                }
                warn!("message {}: {e}; dropped", messages + errors);
            }
        }
        metrics::observe_decode_ns(t0.elapsed().as_nanos() as u64);
    }
    Ok((messages, errors))
}

fn split_length_prefixed(data: &[u8], max_len: usize) -> anyhow::Result<Vec<&[u8]>> {
    let mut frames = Vec::new();
    let mut off = 0usize;
    while off < data.len() {
        if off + 4 > data.len() {
            warn!("trailing {} byte(s) are not a full frame header", data.len() - off);
            break;
        }
        let len = u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
            as usize;
        off += 4;
        if len > max_len {
            anyhow::bail!("frame of {len} bytes exceeds max_message_size {max_len}");
        }
        if off + len > data.len() {
            warn!("truncated final frame ({} of {len} bytes); dropped", data.len() - off);
            break;
        }
        frames.push(&data[off..off + len]);
        off += len;
    }
    Ok(frames)
}
