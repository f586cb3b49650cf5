use clap::Parser;
use std::path::PathBuf;

use airflow_core::{options, run, ModPatches, Options, PatchSettings, ON_SPAWN_HOOK};

#[derive(Debug, Parser)]
#[command(
    name = "airflow-patch",
    version,
    about = "Patch SimCellOccupier.OnSpawn listings for liquid on airflow tiles"
)]
struct Args {
    /// Listing file (.il / .il.gz) or a directory of listings.
    #[arg(long, required_unless_present = "show_options")]
    input: Option<PathBuf>,

    /// Output file, or output directory when the input is a directory.
    #[arg(long, required_unless_present = "show_options")]
    output: Option<PathBuf>,

    /// Method reference the inserted guard calls.
    #[arg(long, default_value = ON_SPAWN_HOOK)]
    hook: String,

    /// Verbose logging and a patch_report.txt next to the output.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Print the effective options and the patches they enable, then exit.
    #[arg(long)]
    show_options: bool,

    /// Options file to use instead of the shared config location. The
    /// options decide which patches are listed in the debug report.
    #[arg(long, value_name = "JSON")]
    options_file: Option<PathBuf>,
}

fn init_logging(debug: bool) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.debug) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let opts = match &args.options_file {
        Some(path) => Options::load_from(path),
        None => Options::load(),
    };

    if args.show_options {
        if let Some(path) = args.options_file.clone().or_else(options::config_path) {
            println!("options file: {}", path.display());
        }
        println!("{}", opts);
        for name in ModPatches::prepare(&opts).active() {
            println!("  {}", name);
        }
        return;
    }

    let settings = PatchSettings {
        // clap enforces input/output unless --show-options was given, and
        // that case has already returned.
        input_path: args.input.expect("input is required unless --show-options is used"),
        output_path: args.output.expect("output is required unless --show-options is used"),
        hook: args.hook,
        options: opts,
        debug: args.debug,
    };

    match run(&settings) {
        Ok(reports) => {
            let patched = reports.iter().filter(|r| r.outcome.is_patched()).count();
            println!("{} of {} listings patched", patched, reports.len());
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
