use std::{io, path::PathBuf, sync::Arc, time::Duration};

use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

use load_pacer::{KeyLogSink, Pacer, PacerDownload, PacerUpload, Sampler, TelemetryScope, Verbosity};

const DOWNLOAD_URL: &str = "https://rpm.obs.cr/large/";
const UPLOAD_URL: &str = "https://rpm.obs.cr:4043/slurp";

#[derive(StructOpt)]
#[structopt(about = "Loads one HTTP/2 connection and samples its throughput and TCP telemetry")]
struct Args {
    /// Target, defaults to a well known endpoint for the chosen direction
    #[structopt(long)]
    url: Option<String>,
    /// Seconds
    #[structopt(long, default_value = "100")]
    duration: u64,
    /// Milliseconds
    #[structopt(long, default_value = "500")]
    sample_period: u64,
    /// Append TLS secrets to this file
    #[structopt(long)]
    key_log: Option<PathBuf>,
    /// `session` or `tick`
    #[structopt(long, default_value = "session")]
    telemetry_scope: TelemetryScope,
    #[structopt(short, long)]
    verbose: bool,
    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(StructOpt)]
enum Command {
    Download,
    Upload {
        /// Stop after this many bytes
        #[structopt(long)]
        upload_limit: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let Args {
        url,
        duration,
        sample_period,
        key_log,
        telemetry_scope,
        verbose,
        command,
    } = Args::from_args();
    let verbosity = Verbosity::from(verbose);

    env_logger::Builder::new()
        .format(|buf, record| {
            use std::{io::Write, time::SystemTime};
            use time::OffsetDateTime;

            let (hour, minute, second, micro) = OffsetDateTime::from(SystemTime::now())
                .time()
                .as_hms_micro();
            writeln!(
                buf,
                "{hour:02}:{minute:02}:{second:02}.{micro:06} [{}] {}",
                record.level(),
                record.args()
            )
        })
        .filter(None, verbosity.level_filter())
        .init();

    anyhow::ensure!(sample_period > 0, "sample period must be positive");

    let key_log = key_log.and_then(|path| match KeyLogSink::open(&path) {
        Ok(sink) => {
            log::info!("appending TLS secrets to {}", sink.path().display());
            Some(Arc::new(sink))
        }
        Err(err) => {
            log::warn!("cannot open key log {}: {err}, continue without it", path.display());
            None
        }
    });

    let mut pacer: Box<dyn Pacer> = match command.unwrap_or(Command::Download) {
        Command::Download => {
            let pacer = PacerDownload::new(url.unwrap_or_else(|| DOWNLOAD_URL.to_owned()));
            match key_log {
                Some(key_log) => Box::new(pacer.with_key_log(key_log)),
                None => Box::new(pacer),
            }
        }
        Command::Upload { upload_limit } => {
            let url = url.unwrap_or_else(|| UPLOAD_URL.to_owned());
            let pacer = PacerUpload::new(url).with_limit(upload_limit);
            match key_log {
                Some(key_log) => Box::new(pacer.with_key_log(key_log)),
                None => Box::new(pacer),
            }
        }
    };

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupted");
            token.cancel();
        })?;
    }

    let sampler = Sampler::new(
        Duration::from_secs(duration),
        Duration::from_millis(sample_period),
    )
    .with_scope(telemetry_scope);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        if !pacer.start(token.clone(), verbosity) {
            anyhow::bail!("cannot start the transfer");
        }
        let report = sampler
            .run(&token, &*pacer, &mut io::stdout().lock())
            .await?;
        token.cancel();
        Ok::<_, anyhow::Error>(report)
    })?;
    println!("Total transferred: {}", report.total);
    rt.shutdown_timeout(Duration::from_secs(1));

    Ok(())
}
