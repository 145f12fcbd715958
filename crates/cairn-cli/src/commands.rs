use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cairn_bundle::{BundleOpener, BundleWriter};
use cairn_cache::LayeredCache;
use cairn_refs::{FsRefIndex, RefIndex};
use cairn_store::{BlobReader, BlobStore, FsBlobStore};
use cairn_tree::{pack, unpack, Chunker};
use cairn_types::CancelToken;
use colored::Colorize;

use crate::cli::{Cli, Command};
use crate::config::Config;

/// Everything a command needs, built once from config.
struct Env {
    config: Config,
    store: Arc<FsBlobStore>,
    refs: FsRefIndex,
    opener: BundleOpener,
}

impl Env {
    fn build(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(store) = &cli.store {
            config.store_root = store.clone();
        }

        let store = Arc::new(
            FsBlobStore::open(config.store_root.join("store"))
                .with_context(|| format!("opening store under {}", config.store_root.display()))?,
        );
        let refs = FsRefIndex::open(config.store_root.join("index"))
            .with_context(|| format!("opening ref index under {}", config.store_root.display()))?;

        let cache = Arc::new(LayeredCache::new(
            Arc::clone(&store) as Arc<dyn BlobReader>,
            config.cache_config(),
        ));
        let opener = BundleOpener::new(cache as Arc<dyn BlobReader>);

        Ok(Self {
            config,
            store,
            refs,
            opener,
        })
    }
}

/// Dispatch a parsed command line.
pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let env = Env::build(&cli)?;
    let cancel = CancelToken::new();

    match cli.command {
        Command::Pack { dir, name } => {
            let chunker = Chunker::new(env.config.chunker_config())
                .context("invalid chunk bounds in config")?;
            let mut writer = BundleWriter::new(Arc::clone(&env.store) as Arc<dyn BlobStore>)
                .with_compression(env.config.compression()?)
                .with_packet_limit(env.config.packet_limit());

            let root = pack(&dir, &mut writer, &chunker, &cancel)
                .with_context(|| format!("packing {}", dir.display()))?;
            let node = writer
                .write_ref(&env.refs, &name, &root, &cancel)
                .with_context(|| format!("publishing ref {name:?}"))?;

            println!(
                "{} {} {} {}",
                "packed".green().bold(),
                dir.display(),
                "->".dimmed(),
                name.bold()
            );
            println!("  root   {}", node.hash);
            println!("  bundle {}", node.locator);
        }

        Command::Extract {
            name,
            dir,
            cache_time,
        } => {
            let target = env
                .refs
                .try_read_ref(&name, cache_time.map(Duration::from_secs))
                .with_context(|| format!("reading ref {name:?}"))?
                .with_context(|| format!("ref {name:?} not found"))?;

            unpack(&env.opener, &target, &dir, &cancel)
                .with_context(|| format!("extracting {name:?} into {}", dir.display()))?;

            println!(
                "{} {} {} {}",
                "extracted".green().bold(),
                name.bold(),
                "->".dimmed(),
                dir.display()
            );
        }

        Command::Dump { locator, json } => {
            let locator = cairn_types::Locator::from_raw(locator);
            let bundle = env
                .opener
                .open(&locator, &cancel)
                .with_context(|| format!("opening bundle {locator}"))?;
            let dump = bundle.dump();
            if json {
                println!("{}", serde_json::to_string_pretty(&dump)?);
            } else {
                println!("{dump}");
            }
        }

        Command::Refs { prefix } => {
            let refs = env.refs.list_refs(&prefix)?;
            if refs.is_empty() {
                println!("{}", "no refs".dimmed());
            }
            for (name, target) in refs {
                println!("{} {}", name.bold(), target.locator.to_string().dimmed());
            }
        }
    }

    Ok(())
}
