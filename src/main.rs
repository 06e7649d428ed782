use video2x::args::{Cli, Mode};
use video2x::error::Error;
use video2x::logging;
use video2x::pipeline::merge::Report;
use video2x::worker;
use video2x::Video2X;

use clap::Parser;
use tracing::{error, info, warn};

fn run(cli: &Cli) -> Result<Report, Error> {
    let (input, output) = cli.paths().unwrap_or_else(|error| error.exit());
    let controller = Video2X::new(cli.processes, cli.loglevel);
    match &cli.mode {
        Mode::Upscale(args) => controller.upscale(
            input,
            output,
            args.width,
            args.height,
            args.noise,
            &args.algorithm,
            args.threshold,
        ),
        Mode::Interpolate(args) => controller.interpolate(input, output, &args.algorithm, args.threshold),
        Mode::Worker(_) => Err(Error::InvalidArgument("worker mode cannot process files".to_string())),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Mode::Worker(args) = &cli.mode {
        let code = match worker::serve(args.settings(), cli.loglevel) {
            Ok(()) => 0,
            Err(error) => {
                error!("worker failed: {}", error);
                1
            }
        };
        std::process::exit(code);
    }

    if let Err(error) = logging::init(cli.loglevel) {
        eprintln!("Error: {}", error);
        std::process::exit(error.exit_code());
    }
    match run(&cli) {
        Ok(report) => info!("Completed! {} frames written", report.frames),
        Err(Error::Cancelled) => {
            warn!("Interrupted by user");
            std::process::exit(Error::Cancelled.exit_code());
        }
        Err(error) => {
            error!("Error: {}", error);
            std::process::exit(error.exit_code());
        }
    }
}
