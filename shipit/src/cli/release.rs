use std::{num::NonZeroUsize, path::PathBuf};

use clap::Args;
use log::warn;

use crate::{
    builder::{Docker, Ko},
    config::{Config, ExcludedServices},
    manifest,
    output::Output,
    registry::Registry,
    release::{Release, ReleaseReport},
    scheduler, Result,
};

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// The maximum number of services built and pushed at the same time.
    #[arg(long = "max-concurrency", default_value_t = scheduler::DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: NonZeroUsize,

    /// Push below this namespace and record the published images in its manifest. Nothing is
    /// recorded without a namespace.
    #[arg(long = "namespace")]
    pub namespace: Option<String>,

    /// Where the manifests of all namespaces are kept.
    #[arg(long = "manifest-dir", default_value = manifest::DEFAULT_MANIFEST_DIR)]
    pub manifest_dir: PathBuf,

    /// A file listing services to leave out of this release.
    #[arg(long = "exclude-file")]
    pub exclude_file: Option<PathBuf>,

    /// Run docker builds in this docker context, e.g. one pointing at a remote builder.
    #[arg(long = "docker-context")]
    pub docker_context: Option<String>,
}

pub fn release(
    registry: &dyn Registry,
    config: &Config,
    args: ReleaseArgs,
    output: &Output,
) -> Result<()> {
    let ReleaseArgs {
        max_concurrency,
        namespace,
        manifest_dir,
        exclude_file,
        docker_context,
    } = args;

    let mut units = config.units()?;
    if let Some(exclude_file) = &exclude_file {
        units = ExcludedServices::load(exclude_file)?.filter(units);
    }
    if units.is_empty() {
        warn!("No services to release");
        return Ok(());
    }

    let ko = Ko::new(output.clone());
    let docker = Docker::new(docker_context, output.clone());
    let report = Release {
        registry,
        native: &ko,
        publisher: &ko,
        external: &docker,
        logical_domain: &config.logical_registry,
        namespace: namespace.as_deref(),
        manifest_dir: &manifest_dir,
        max_concurrency,
    }
    .run(&units)?;

    if output.is_verbose() {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &ReleaseReport) {
    use comfy_table::{Attribute, Cell, ContentArrangement, Table};

    let mut records: Vec<_> = report.records.iter().collect();
    records.sort_by(|a, b| a.old_reference.cmp(&b.old_reference));

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["image", "published as"]
                .into_iter()
                .map(|name| Cell::new(name).add_attribute(Attribute::Bold)),
        );
    for record in records {
        table.add_row([&record.old_reference, &record.new_reference]);
    }

    println!("{table}");
    if let Some(manifest) = &report.manifest {
        println!("Recorded in {}", manifest.display());
    }
}
