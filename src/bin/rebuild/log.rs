use clap::ValueEnum;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum WhenColor {
    Always,
    Never,
    Auto,
}

pub fn make_logger<W>(writer: W, color: WhenColor) -> impl tracing::Subscriber
where
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_writer(writer);
    let layer = match color {
        WhenColor::Always => layer.with_ansi(true),
        WhenColor::Never => layer.with_ansi(false),
        WhenColor::Auto => layer,
    }
    .with_filter(
        tracing_subscriber::EnvFilter::builder()
            .with_env_var("REBUILD_LOG")
            .from_env_lossy(),
    );

    tracing_subscriber::registry().with(layer)
}
