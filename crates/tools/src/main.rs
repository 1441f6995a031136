use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use catalog::ThemeLoader;
use clap::{Parser, Subcommand};
use formats::ProfileDirectory;
use foundation::ProfileId;
use layers::Viewport;
use tools::{SessionOptions, open_session, resolve_root, validate_profile, visibility_table};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and apply map theme profiles")]
struct Args {
    /// Directory holding one sub-directory per profile (default: $ATLAS_PROFILE_ROOT or ./profiles)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List profiles under the root
    Profiles,

    /// List the themes of a profile
    Themes {
        #[arg(long)]
        profile: String,
    },

    /// Apply a theme and print the resulting layer state
    Apply {
        #[arg(long)]
        profile: String,

        /// Theme id (default: the catalogue's default theme)
        #[arg(long)]
        theme: Option<String>,

        /// Zoom level used for scale range checks
        #[arg(long, requires = "lat")]
        zoom: Option<f64>,

        /// Viewport center latitude
        #[arg(long, requires = "zoom")]
        lat: Option<f64>,

        /// Skip fitting the viewport to the visible layers
        #[arg(long)]
        no_fit: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a profile's themes against its layer manifest and styles
    Validate {
        #[arg(long)]
        profile: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let root = resolve_root(args.root);

    match args.command {
        Command::Profiles => {
            let profiles = ProfileDirectory::new(&root)
                .list_profiles()
                .with_context(|| format!("listing profiles under {}", root.display()))?;
            for profile in profiles {
                println!("{profile}");
            }
        }
        Command::Themes { profile } => {
            let loader = ThemeLoader::new(Arc::new(ProfileDirectory::new(&root)));
            let catalogue = loader.load(&ProfileId::new(profile)).await?;
            for theme in &catalogue.themes {
                let marker = if theme.id == catalogue.default_theme { "*" } else { " " };
                println!(
                    "{marker} {:<20} {:<9} {}",
                    theme.id.as_str(),
                    format!("{:?}", theme.kind).to_lowercase(),
                    theme.display_name()
                );
            }
        }
        Command::Apply {
            profile,
            theme,
            zoom,
            lat,
            no_fit,
            json,
        } => {
            let viewport = zoom.zip(lat).map(|(zoom, lat)| Viewport::new(zoom, lat));
            let options = SessionOptions {
                viewport,
                fit_viewport: !no_fit,
            };
            let workspace = open_session(&root, &ProfileId::new(profile), options).await?;
            let selector = workspace.session.selector();
            let report = match theme {
                Some(id) => selector.set_theme(&id).await?,
                None => selector.apply_default().await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", visibility_table(&workspace, &report));
            }
        }
        Command::Validate { profile } => {
            let problems = validate_profile(&root, &ProfileId::new(profile)).await?;
            if !problems.is_empty() {
                for problem in &problems {
                    eprintln!("{problem}");
                }
                bail!("{} problem(s) found", problems.len());
            }
            println!("ok");
        }
    }
    Ok(())
}
