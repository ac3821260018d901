use std::{io, num::NonZeroU8, panic};

use anyhow::{Context, Result};
use time::format_description::well_known::{
    iso8601::{self, EncodedConfig},
    Iso8601,
};
use tracing::error;
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    prelude::__tracing_subscriber_SubscriberExt,
    EnvFilter, Layer,
};

const MY_CONFIG: EncodedConfig = iso8601::Config::DEFAULT
    .set_time_precision(iso8601::TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

fn default_filter() -> EnvFilter {
    let level = if cfg!(debug_assertions) {
        "trace"
    } else {
        "info"
    };
    EnvFilter::new(format!(
        "{}={level},recvpeer_lib={level}",
        env!("CARGO_CRATE_NAME")
    ))
}

/// Logs go to stderr so that stdout only carries signaling codes.
pub fn init_tracing(ansi: bool) -> Result<()> {
    const WITH_FILE_PATH: bool = cfg!(debug_assertions);
    let layer = fmt::layer()
        .compact()
        .with_file(WITH_FILE_PATH)
        .with_line_number(WITH_FILE_PATH)
        .with_target(!WITH_FILE_PATH)
        .with_thread_ids(true)
        .with_timer(LocalTime::new(Iso8601::<MY_CONFIG>))
        .with_ansi(ansi)
        .with_writer(io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(layer.with_filter(filter)),
    )
    .context("Failed to install tracing subscriber")?;

    panic::set_hook(Box::new(|panic| error!("{}", panic)));
    Ok(())
}
