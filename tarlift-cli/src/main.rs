use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

mod progress;

/// Create and extract tar archives of S3 objects entirely server-side: the payload bytes never
/// leave the object store.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    #[clap(flatten)]
    config: tarlift::Config,

    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new tar archive from S3 objects, assembled inside the object store.
    Create {
        /// URL of the archive object to create, e.g. `s3://bucket/backups/data.tar`.
        #[clap(value_parser, value_name = "ARCHIVE_URL")]
        archive: Url,

        /// S3 URLs naming the objects to include.
        ///
        /// Each URL can name a whole bucket (`s3://bucket/`), a prefix (`s3://bucket/logs/`),
        /// or a single object (`s3://bucket/logs/today.log`).  Listings are archived in key
        /// order.
        #[clap(value_parser, value_name = "SOURCE_URLS")]
        sources: Vec<Url>,

        /// Read the object list from a manifest instead of (or on top of) source URLs.
        ///
        /// One object per line as `bucket,key,size[,etag]`; lines starting with `#` are
        /// comments.  The manifest may be a local path or an `s3://` URL.
        #[clap(long, value_name = "PATH_OR_URL")]
        manifest: Option<String>,

        /// Exclude objects whose keys match this pattern.
        ///
        /// `|` separates alternatives; `*` matches anything and `?` one character, e.g.
        /// `*.tmp|*.log`.
        #[clap(long, value_name = "PATTERN")]
        exclude: Option<String>,

        /// Rewrite member names with sed-style substitutions, e.g. `s|^raw/|archive/|g`.
        ///
        /// Multiple expressions are separated by `;` and applied in order.  Source objects are
        /// read under their original keys; only the names recorded in the archive change.
        #[clap(long, value_name = "EXPRESSIONS")]
        transform: Option<String>,

        /// Embed a table of contents as the archive's first member (`.toc.csv`), so it can be
        /// listed and extracted without scanning.
        #[clap(long)]
        toc: bool,

        /// Tag the archive object, as `key=value`.  May be given more than once.
        #[clap(long, value_name = "KEY=VALUE")]
        tag: Vec<String>,

        /// Storage class for the archive object, e.g. `STANDARD_IA` or `DEEP_ARCHIVE`.
        #[clap(long, value_name = "CLASS")]
        storage_class: Option<String>,
    },

    /// Extract members of an archive into objects under a target prefix, server-side.
    Extract {
        /// URL of the archive object to extract from.
        #[clap(value_parser, value_name = "ARCHIVE_URL")]
        archive: Url,

        /// URL of the bucket and prefix to extract into.
        ///
        /// Member names are appended verbatim: extracting `a/b.txt` to `s3://bucket/out/`
        /// creates `s3://bucket/out/a/b.txt`.  Note that a trailing `/` isn't implied.
        #[clap(value_parser, value_name = "TARGET_URL")]
        target: Url,

        /// Extract only these members: exact names, or prefixes ending in `/`.  With none,
        /// everything is extracted.
        #[clap(value_name = "NAMES")]
        names: Vec<String>,

        /// Use a table of contents from this local file instead of the archive's own.
        #[clap(long, value_name = "PATH")]
        external_toc: Option<PathBuf>,
    },

    /// Print an archive's members, from its table of contents or a header scan.
    List {
        /// URL of the archive object.
        #[clap(value_parser, value_name = "ARCHIVE_URL")]
        archive: Url,
    },

    /// Write an archive's table of contents in the exchange text form.
    GenerateToc {
        /// URL of the archive object.
        #[clap(value_parser, value_name = "ARCHIVE_URL")]
        archive: Url,

        /// Write the TOC here instead of stdout.
        #[clap(short = 'o', long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn init_logging(globals: &Globals) {
    let default_filter = if globals.quiet {
        "error"
    } else if globals.verbose {
        "h2=warn,hyper=info,rustls=info,aws=info,debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_logging(&args.globals);

    let config = args.globals.config.clone();
    let quiet = args.globals.quiet;

    // ctrl-c aborts the job; the library aborts its uploads on the way out
    let abort = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match args.command {
        Command::Create {
            archive,
            sources,
            manifest,
            exclude,
            transform,
            toc,
            tag,
            storage_class,
        } => {
            let mut builder = tarlift::CreateArchiveJobBuilder::new(config, archive);

            for source in &sources {
                progress::with_spinner(quiet, format!("Listing {}...", source), async {
                    builder.add_input(source).await
                })
                .await?;
            }

            if let Some(manifest) = manifest {
                builder.add_manifest(parse_manifest_location(&manifest)?);
            }
            if let Some(pattern) = &exclude {
                builder.exclude(pattern)?;
            }
            if let Some(expressions) = &transform {
                builder.name_transform(expressions)?;
            }
            builder.embed_toc(toc);
            for tag in &tag {
                let (key, value) = tag.split_once('=').ok_or_else(|| {
                    color_eyre::eyre::eyre!("tag '{}' is not of the form key=value", tag)
                })?;
                builder.add_tag(key, value);
            }
            if let Some(class) = storage_class {
                builder.storage_class(class);
            }

            let job = progress::with_spinner(quiet, "Resolving input objects...", async {
                builder.build().await
            })
            .await?;

            if !quiet {
                eprintln!(
                    "Archiving {} objects ({})",
                    job.total_objects(),
                    progress::human_bytes(job.total_bytes())
                );
            }

            job.run(abort, progress::CreateProgressReport::new(quiet))
                .await?;
        }

        Command::Extract {
            archive,
            target,
            names,
            external_toc,
        } => {
            let mut builder = tarlift::ExtractArchiveJobBuilder::new(config, archive, target);

            for name in &names {
                builder.add_filter(name)?;
            }
            if let Some(path) = external_toc {
                builder.external_toc(tokio::fs::read_to_string(&path).await?);
            }

            let job = progress::with_spinner(quiet, "Reading table of contents...", async {
                builder.build().await
            })
            .await?;

            if !quiet {
                eprintln!(
                    "Extracting {} objects ({})",
                    job.total_objects(),
                    progress::human_bytes(job.total_bytes())
                );
            }

            job.run(abort, progress::ExtractProgressReport::new(quiet))
                .await?;
        }

        Command::List { archive } => {
            let entries = progress::with_spinner(quiet, "Reading table of contents...", async {
                tarlift::read_archive_toc(config, &archive).await
            })
            .await?;

            for entry in &entries {
                println!("{:>16}  {}", progress::human_bytes(entry.length), entry.name);
            }
            if !quiet {
                eprintln!("{} members", entries.len());
            }
        }

        Command::GenerateToc { archive, output } => {
            let entries = progress::with_spinner(quiet, "Scanning archive...", async {
                tarlift::read_archive_toc(config, &archive).await
            })
            .await?;

            let text = tarlift::render_toc(&entries);
            match output {
                Some(path) => tokio::fs::write(&path, text).await?,
                None => print!("{}", text),
            }
        }
    }

    Ok(())
}

fn parse_manifest_location(manifest: &str) -> color_eyre::Result<tarlift::ManifestLocation> {
    if manifest.starts_with("s3://") {
        Ok(tarlift::ManifestLocation::Url(manifest.parse()?))
    } else {
        Ok(tarlift::ManifestLocation::File(PathBuf::from(manifest)))
    }
}
