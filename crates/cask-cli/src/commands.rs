use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context};

use cask_store::{AddOptions, Config, Filter, Key, Span, Store};
use cask_types::{Algorithm, DigestUri, Object};

use crate::cli::{
    AddArgs, Cli, Command, GetArgs, InitArgs, ListArgs, OutputFormat, RmArgs, StatsArgs,
};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Init(args) => cmd_init(&cli, args),
        Command::Add(args) => cmd_add(&cli, args),
        Command::Get(args) => cmd_get(&cli, args),
        Command::Rm(args) => cmd_rm(&cli, args),
        Command::Stats(args) => cmd_stats(&cli, args),
        Command::List(args) => cmd_list(&cli, args),
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<Store> {
    Store::open(Config::new(&cli.store))
        .with_context(|| format!("failed to open store at {}", cli.store))
}

fn cmd_init(cli: &Cli, args: &InitArgs) -> anyhow::Result<()> {
    let mut config = Config::new(&cli.store);

    if !args.algorithms.is_empty() {
        let algorithms = args
            .algorithms
            .iter()
            .map(|s| s.parse::<Algorithm>())
            .collect::<Result<Vec<_>, _>>()?;
        config = config.algorithms(algorithms);
    }
    if let Some(primary) = &args.primary {
        config = config.primary(primary.parse()?);
    }
    if let Some(mapsize) = &args.mapsize {
        config = config.mapsize(mapsize)?;
    }
    if let Some(umask) = &args.umask {
        let mask = u32::from_str_radix(umask, 8)
            .with_context(|| format!("umask {umask:?} is not octal"))?;
        config = config.umask(mask);
    }

    let store = Store::open(config)?;
    println!(
        "initialized store at {} (algorithms: {}, primary: {})",
        cli.store,
        Algorithm::format_set(store.algorithms()),
        store.primary(),
    );
    Ok(())
}

fn cmd_add(cli: &Cli, args: &AddArgs) -> anyhow::Result<()> {
    let store = open_store(cli)?;
    let opts = AddOptions {
        media_type: args.media_type.clone(),
        charset: args.charset.clone(),
        language: args.language.clone(),
        encoding: args.encoding.clone(),
        mtime: None,
        strict: args.strict,
        preserve: args.preserve,
    };

    if args.paths.is_empty() {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        let obj = store.add(buf.as_slice(), opts)?;
        print_object(cli, &obj)?;
        return Ok(());
    }

    for path in &args.paths {
        let obj = store
            .add(Path::new(path), opts.clone())
            .with_context(|| format!("failed to add {path}"))?;
        print_object(cli, &obj)?;
    }
    Ok(())
}

fn cmd_get(cli: &Cli, args: &GetArgs) -> anyhow::Result<()> {
    let store = open_store(cli)?;
    let uri = DigestUri::parse(&args.uri)?;

    let Some(found) = store.get(&uri)? else {
        bail!("not found: {}", args.uri);
    };
    let Some(blob) = found.blob else {
        bail!("{} is deleted (removed {})", args.uri, found.object.dtime.map(|d| d.to_string()).unwrap_or_default());
    };

    let mut reader = blob.into_file()?;
    io::copy(&mut reader, &mut io::stdout().lock())?;
    Ok(())
}

fn cmd_rm(cli: &Cli, args: &RmArgs) -> anyhow::Result<()> {
    let store = open_store(cli)?;
    for raw in &args.keys {
        let removed = if raw.starts_with("ni:") {
            let uri = DigestUri::parse(raw)?;
            remove_key(&store, Key::Uri(&uri), args.forget)?
        } else {
            remove_key(&store, Key::Path(Path::new(raw)), args.forget)?
        };
        match removed {
            Some(obj) => print_object(cli, &obj)?,
            None => eprintln!("not found: {raw}"),
        }
    }
    Ok(())
}

fn remove_key(store: &Store, key: Key<'_>, forget: bool) -> anyhow::Result<Option<Object>> {
    let removed = if forget {
        store.forget(key)?
    } else {
        store.remove(key)?
    };
    Ok(removed.map(|r| r.object))
}

fn cmd_stats(cli: &Cli, _args: &StatsArgs) -> anyhow::Result<()> {
    let store = open_store(cli)?;
    let stats = store.stats()?;

    match cli.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(io::stdout().lock(), &stats)?;
            println!();
        }
        OutputFormat::Text => {
            println!("objects:  {}", stats.objects);
            println!("deleted:  {}", stats.deleted);
            println!("bytes:    {}", stats.bytes);
            print_occupancy("types", &stats.types);
            print_occupancy("languages", &stats.languages);
            print_occupancy("charsets", &stats.charsets);
            print_occupancy("encodings", &stats.encodings);
        }
    }
    Ok(())
}

fn print_occupancy(label: &str, map: &std::collections::BTreeMap<String, u64>) {
    if map.is_empty() {
        return;
    }
    println!("{label}:");
    for (value, count) in map {
        println!("  {value}: {count}");
    }
}

fn cmd_list(cli: &Cli, args: &ListArgs) -> anyhow::Result<()> {
    let store = open_store(cli)?;
    let filter = Filter {
        types: args.types.clone(),
        languages: args.language.clone(),
        charsets: args.charset.clone(),
        encodings: args.encoding.clone(),
        size: Span {
            lo: args.min_size,
            hi: args.max_size,
        },
        dtime: if args.deleted {
            Span::at_least(1)
        } else {
            Span::default()
        },
        ..Filter::new()
    };

    for found in store.list(&filter)? {
        print_object(cli, &found.object)?;
    }
    Ok(())
}

fn print_object(cli: &Cli, obj: &Object) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            serde_json::to_writer(io::stdout().lock(), obj)?;
            println!();
        }
        OutputFormat::Text => {
            let uri = obj
                .best_digest()
                .map(|d| d.to_uri())
                .unwrap_or_else(|| "<no digest>".to_string());
            let state = if obj.is_cache() {
                "cache"
            } else if obj.dtime.is_some() {
                "deleted"
            } else {
                "live"
            };
            let mut line = format!(
                "{uri} {size} {media_type} [{state}]",
                size = obj.size,
                media_type = obj.media_type_or_default(),
            );
            if obj.fresh {
                line.push_str(" (fresh)");
            }
            println!("{line}");
        }
    }
    Ok(())
}
