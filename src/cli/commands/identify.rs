//! Identify the tracks in a recording.

use std::path::Path;

use futures::StreamExt;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, ResultExt};
use crate::identification::{
    IdentificationError, IdentificationManager, IdentificationReport, MixInfo, PipelineContext,
    RunStats,
};
use crate::matcher::Track;
use crate::providers::{fingerprint, ProviderKind};
use crate::segment::{is_tool_available, FfmpegSegmenter};

use super::{print_ffmpeg_install_instructions, print_fpcalc_install_instructions};

#[derive(Serialize)]
struct JsonReport<'a> {
    mix: MixInfo,
    tracks: &'a [Track],
    stats: RunStats,
    duration_secs: f64,
}

/// Segment `input`, identify every segment and print the tracklist.
pub fn cmd_identify(rt: &Runtime, config: &Config, input: &Path, json: bool) -> anyhow::Result<()> {
    if !input.exists() {
        return Err(Error::not_found(input).into());
    }
    config.validate().with_context("invalid configuration")?;

    rt.block_on(async {
        check_required_tools(config).await?;

        let ctx = PipelineContext::from_config(config).await;
        ctx.limiter.register_alert_callback(|message| {
            eprintln!("⚠ {}", message);
        });
        ctx.registry
            .validate()
            .with_context("provider setup failed")?;
        let manager = IdentificationManager::new(ctx.clone(), config)?;

        let segmenter = FfmpegSegmenter::new(config.segmentation.clone());
        let (duration, mut receiver) = segmenter
            .split(input)
            .await
            .with_context(format!("failed to segment {}", input.display()))?;

        if !json {
            println!(
                "Identifying: {} ({})",
                input.display(),
                crate::matcher::format_timestamp(duration)
            );
            println!();
        }

        let segments = futures::stream::poll_fn(move |cx| receiver.poll_recv(cx)).filter_map(
            |segment| async move {
                match segment {
                    Ok(segment) => Some(segment),
                    Err(e) => {
                        tracing::warn!("Skipping segment: {}", e);
                        None
                    }
                }
            },
        );

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling...");
                on_ctrl_c.cancel();
            }
        });

        let result = manager.identify_tracks(segments, &cancel).await;
        ctx.registry.close_all().await;

        match result {
            Ok(report) => {
                print_report(input, &report, json)?;
                Ok(())
            }
            Err(IdentificationError::NoResults {
                segments,
                input_duration,
            }) => {
                println!("✗ No tracks identified.");
                println!(
                    "  {} segments covering {} were checked.",
                    segments,
                    crate::matcher::format_timestamp(input_duration)
                );
                // Already reported; main maps this to a bare exit status
                Err(IdentificationError::NoResults {
                    segments,
                    input_duration,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    })
}

async fn check_required_tools(config: &Config) -> anyhow::Result<()> {
    for tool in ["ffmpeg", "ffprobe"] {
        if !is_tool_available(tool).await {
            eprintln!("Error: {} not found.", tool);
            print_ffmpeg_install_instructions();
            anyhow::bail!("{} is required to segment recordings", tool);
        }
    }

    let uses_acoustid = config
        .providers
        .provider_order()
        .iter()
        .any(|name| name.parse::<ProviderKind>().ok() == Some(ProviderKind::AcoustId));
    if uses_acoustid && !fingerprint::is_fpcalc_available() {
        eprintln!("Error: fpcalc not found.");
        print_fpcalc_install_instructions();
        anyhow::bail!("fpcalc is required for AcoustID");
    }
    Ok(())
}

fn print_report(input: &Path, report: &IdentificationReport, json: bool) -> anyhow::Result<()> {
    let title = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mix = report.mix_info(title, "", chrono::Local::now().format("%Y-%m-%d").to_string());

    if json {
        let output = JsonReport {
            mix,
            tracks: &report.tracks,
            stats: report.stats,
            duration_secs: report.input_duration.as_secs_f64(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("✓ {} tracks found in {}", mix.track_count(), report.duration_label());
    println!();
    for track in &report.tracks {
        println!("  {}  ({:.0}%)", track, track.confidence());
    }

    let stats = report.stats;
    println!();
    println!(
        "Segments: {} | identified: {} | cached: {} | no match: {} | skipped: {} | rejected: {}",
        stats.segments,
        stats.identified,
        stats.cache_hits,
        stats.no_match,
        stats.skipped,
        stats.rejected
    );
    Ok(())
}
