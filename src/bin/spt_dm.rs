use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spt_dataset_manager::catalog::CkanHttpClient;
use spt_dataset_manager::config::{ConfigLoader, ResolvedConfig};
use spt_dataset_manager::download::PollPolicy;
use spt_dataset_manager::error::SptError;
use spt_dataset_manager::geoserver::{GeoServerHttpClient, GeoServerManager};
use spt_dataset_manager::identity::{ECMWF_MODEL, IdentityStrategy};
use spt_dataset_manager::manager::{DatasetManager, DatasetMetadata};
use spt_dataset_manager::output::JsonOutput;
use spt_dataset_manager::retention::RetentionScope;

#[derive(Parser)]
#[command(name = "spt-dm")]
#[command(about = "Streamflow Prediction Tool dataset manager for CKAN and GeoServer")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Package and upload forecast outputs")]
    Upload(UploadArgs),
    #[command(about = "Download forecast datasets")]
    Download(DownloadArgs),
    #[command(about = "Mirror RAPID input files locally")]
    Sync(SyncArgs),
    #[command(about = "Delete datasets older than a number of days")]
    Purge(PurgeArgs),
    #[command(about = "Manage GeoServer layers")]
    Geoserver(GeoServerArgs),
}

#[derive(Args)]
struct UploadArgs {
    #[command(subcommand)]
    command: UploadCommand,
}

#[derive(Subcommand)]
enum UploadCommand {
    #[command(about = "Upload an ECMWF output tree (<root>/<watershed>-<subbasin>/<cycle>/)")]
    Ecmwf { root: PathBuf },
    #[command(about = "Upload one WRF-Hydro RapidResult file")]
    Wrf {
        file: PathBuf,
        #[command(flatten)]
        basin: BasinArgs,
    },
    #[command(about = "Upload a RAPID input directory")]
    RapidInput {
        directory: PathBuf,
        #[command(flatten)]
        instance: InstanceArgs,
    },
}

#[derive(Args)]
struct DownloadArgs {
    #[command(subcommand)]
    command: DownloadCommand,
}

#[derive(Subcommand)]
enum DownloadCommand {
    #[command(about = "Download the newest complete ECMWF cycle")]
    Recent {
        root: PathBuf,
        #[command(flatten)]
        basin: BasinArgs,
    },
    #[command(about = "Download the newest set of warning points")]
    WarningPoints {
        root: PathBuf,
        #[command(flatten)]
        basin: BasinArgs,
    },
    #[command(about = "Download every resource of one ECMWF cycle")]
    Prediction {
        root: PathBuf,
        #[command(flatten)]
        basin: BasinArgs,
        #[arg(long)]
        date: String,
    },
    #[command(about = "Download the newest WRF-Hydro result")]
    WrfRecent {
        root: PathBuf,
        #[command(flatten)]
        basin: BasinArgs,
    },
}

#[derive(Args)]
struct BasinArgs {
    #[arg(long)]
    watershed: String,
    #[arg(long)]
    subbasin: String,
}

#[derive(Args)]
struct InstanceArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    instance_id: String,
}

#[derive(Args)]
struct SyncArgs {
    root: Utf8PathBuf,
    #[command(flatten)]
    instance: InstanceArgs,
}

#[derive(Args)]
struct PurgeArgs {
    #[arg(long)]
    days: u32,
    #[arg(long, requires = "subbasin")]
    watershed: Option<String>,
    #[arg(long, requires = "watershed")]
    subbasin: Option<String>,
    #[arg(long, default_value = ECMWF_MODEL)]
    model: String,
}

#[derive(Args)]
struct GeoServerArgs {
    #[command(subcommand)]
    command: GeoServerCommand,
}

#[derive(Subcommand)]
enum GeoServerCommand {
    #[command(about = "Delete a layer together with its store")]
    PurgeLayer { layer: String },
    #[command(about = "Delete a layer group and all of its layers")]
    PurgeLayerGroup { group: String },
    #[command(about = "Upload shapefile parts (.shp .shx .prj .dbf) as a layer")]
    UploadShapefile {
        name: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        no_rename: bool,
        #[arg(long)]
        no_overwrite: bool,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(spt) = report.downcast_ref::<SptError>() {
            return ExitCode::from(map_exit_code(spt));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SptError) -> u8 {
    match error {
        SptError::MissingConfig
        | SptError::ConfigRead(_)
        | SptError::ConfigParse(_)
        | SptError::MissingConfigSection(_)
        | SptError::InvalidEndpoint(_) => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let now = Utc::now().naive_utc();

    match cli.command {
        Commands::Upload(args) => run_upload(args.command, &config, now),
        Commands::Download(args) => run_download(args.command, &config, now),
        Commands::Sync(args) => {
            let strategy =
                IdentityStrategy::rapid_input(&args.instance.model, &args.instance.instance_id);
            let manager = dataset_manager(&config, strategy)?;
            let report = manager.sync_rapid_input(&args.root, now)?;
            JsonOutput::print_sync(&report).into_diagnostic()
        }
        Commands::Purge(args) => {
            let strategy = if args.model == ECMWF_MODEL {
                IdentityStrategy::ecmwf()
            } else {
                IdentityStrategy::generic(&args.model)
            };
            let scope = match (args.watershed, args.subbasin) {
                (Some(watershed), Some(subbasin)) => RetentionScope::Subbasin {
                    watershed,
                    subbasin,
                },
                _ => RetentionScope::Model,
            };
            let manager = dataset_manager(&config, strategy)?;
            let report = manager.purge_older_than(args.days, &scope, now)?;
            JsonOutput::print_purge(&report).into_diagnostic()
        }
        Commands::Geoserver(args) => run_geoserver(args.command, &config),
    }
}

fn run_upload(
    command: UploadCommand,
    config: &ResolvedConfig,
    now: NaiveDateTime,
) -> miette::Result<()> {
    match command {
        UploadCommand::Ecmwf { root } => {
            let manager = dataset_manager(config, IdentityStrategy::ecmwf())?;
            let result = manager.zip_upload_ensemble_tree(&root)?;
            JsonOutput::print_upload(&result).into_diagnostic()
        }
        UploadCommand::Wrf { file, basin } => {
            let manager = dataset_manager(config, IdentityStrategy::wrf_hydro())?;
            let item = manager.zip_upload_wrf_resource(&file, &basin.watershed, &basin.subbasin)?;
            JsonOutput::print_upload_item(Some(&item)).into_diagnostic()
        }
        UploadCommand::RapidInput {
            directory,
            instance,
        } => {
            let strategy = IdentityStrategy::rapid_input(&instance.model, &instance.instance_id);
            let manager = dataset_manager(config, strategy)?;
            let item = manager.zip_upload_rapid_input(&directory, now)?;
            JsonOutput::print_upload_item(item.as_ref()).into_diagnostic()
        }
    }
}

fn run_download(
    command: DownloadCommand,
    config: &ResolvedConfig,
    now: NaiveDateTime,
) -> miette::Result<()> {
    match command {
        DownloadCommand::Recent { root, basin } => {
            let manager = dataset_manager(config, IdentityStrategy::ecmwf())?;
            let download = manager.download_recent_ensemble(
                &basin.watershed,
                &basin.subbasin,
                &root,
                now,
                &PollPolicy::default(),
            )?;
            JsonOutput::print_recent(download.as_ref()).into_diagnostic()
        }
        DownloadCommand::WarningPoints { root, basin } => {
            let manager = dataset_manager(config, IdentityStrategy::ecmwf())?;
            let download = manager.download_recent_warning_points(
                &basin.watershed,
                &basin.subbasin,
                &root,
                now,
            )?;
            JsonOutput::print_warning_points(download.as_ref()).into_diagnostic()
        }
        DownloadCommand::Prediction { root, basin, date } => {
            let manager = dataset_manager(config, IdentityStrategy::ecmwf())?;
            let ctx = manager.context(&basin.watershed, &basin.subbasin, &date)?;
            let outcome = manager.download_prediction_dataset(&ctx, &root)?;
            JsonOutput::print_fetch(&outcome).into_diagnostic()
        }
        DownloadCommand::WrfRecent { root, basin } => {
            let manager = dataset_manager(config, IdentityStrategy::wrf_hydro())?;
            let download =
                manager.download_recent_wrf(&basin.watershed, &basin.subbasin, &root, now)?;
            JsonOutput::print_recent(download.as_ref()).into_diagnostic()
        }
    }
}

fn run_geoserver(command: GeoServerCommand, config: &ResolvedConfig) -> miette::Result<()> {
    let settings = config.geoserver()?;
    let client = GeoServerHttpClient::new(
        &settings.endpoint,
        &settings.username,
        &settings.password,
        settings.timeout,
    )?;
    let manager = GeoServerManager::new(
        client,
        &settings.app_instance_id,
        settings.empty_shapefile.clone(),
    )?;
    info!(workspace = manager.workspace(), "connected to GeoServer");

    match command {
        GeoServerCommand::PurgeLayer { layer } => {
            manager.purge_remove_layer(&layer)?;
            JsonOutput::print_layers(&[manager.layer_name(&layer)]).into_diagnostic()
        }
        GeoServerCommand::PurgeLayerGroup { group } => {
            let layers = manager.purge_remove_layer_group(&group)?;
            JsonOutput::print_layers(&layers).into_diagnostic()
        }
        GeoServerCommand::UploadShapefile {
            name,
            mut files,
            no_rename,
            no_overwrite,
        } => {
            let upload = manager.upload_shapefile(&name, &mut files, !no_rename, !no_overwrite)?;
            JsonOutput::print_layer_upload(upload.as_ref()).into_diagnostic()
        }
    }
}

fn dataset_manager(
    config: &ResolvedConfig,
    strategy: IdentityStrategy,
) -> Result<DatasetManager<CkanHttpClient>, SptError> {
    let settings = config.ckan()?;
    let client = CkanHttpClient::new(&settings.endpoint, settings.api_key.as_deref(), settings.timeout)?;
    let metadata =
        DatasetMetadata::for_strategy(&strategy).with_owner_org(settings.owner_org.clone());
    Ok(DatasetManager::new(client, strategy, metadata))
}
