use std::{env, fs};

use aether::runtime::{
    Context, RuntimeConfig,
    heap::{Block, Tag, drop_match, reuse_match},
    value::Datatype,
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "AETHER_LOG";

const LEAF: Tag = Tag::new(1);
const NODE: Tag = Tag::new(2);
const MIN_DEPTH: u32 = 4;

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|arg| arg == "--verbose");
    if verbose {
        args.retain(|arg| arg != "--verbose");
    }
    init_logging(verbose);

    let config_path = match extract_config_path(&mut args) {
        Some(value) => value,
        None => return,
    };
    let config = match load_config(config_path.as_deref()) {
        Some(config) => config,
        None => return,
    };

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => print_help(),
        "config" => match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error: cannot serialize configuration: {e}"),
        },
        "trees" => {
            if args.len() < 3 {
                eprintln!("Usage: aether trees <depth>");
                return;
            }
            let depth = match args[2].parse::<u32>() {
                Ok(depth) if depth <= 24 => depth,
                _ => {
                    eprintln!("Error: trees expects a depth between 0 and 24.");
                    return;
                }
            };
            run_trees(depth, config);
        }
        other => {
            eprintln!("Error: unknown command `{other}`");
            print_help();
        }
    }
}

fn print_help() {
    println!(
        "\
Aether runtime driver

Usage:
  aether trees <depth>
  aether config

Flags:
  --verbose          Log context lifecycle at debug level
  --config <file>    Read the runtime configuration from a JSON file

Environment:
  AETHER_LOG                    Log filter (default: warn)
  AETHER_MAX_RELEASE_DEPTH      Release recursion depth before deferring frees
  AETHER_DELAYED_FREE_CAPACITY  Initial deferred-free list capacity
  AETHER_WARN_ON_LEAK           Warn about live bytes at context teardown
"
    );
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn extract_config_path(args: &mut Vec<String>) -> Option<Option<String>> {
    let mut path = None;
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            if i + 1 >= args.len() {
                eprintln!("Usage: aether <command> --config <file.json>");
                return None;
            }
            path = Some(args.remove(i + 1));
            args.remove(i);
            continue;
        }
        i += 1;
    }
    Some(path)
}

fn load_config(path: Option<&str>) -> Option<RuntimeConfig> {
    let result = match path {
        Some(path) => match fs::read_to_string(path) {
            Ok(text) => RuntimeConfig::from_json(&text),
            Err(e) => {
                eprintln!("Error: cannot read {path}: {e}");
                return None;
            }
        },
        None => RuntimeConfig::from_env(),
    };
    match result {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Error: {e}");
            None
        }
    }
}

fn make(depth: u32, ctx: &mut Context) -> Datatype {
    if depth == 0 {
        return Datatype::from_tag(LEAF);
    }
    let left = make(depth - 1, ctx).into_boxed();
    let right = make(depth - 1, ctx).into_boxed();
    Datatype::from_block(Block::new(NODE, [left, right], ctx))
}

/// Swaps the children of every node, rebuilding unique nodes in place.
fn mirror(tree: Datatype, ctx: &mut Context) -> Datatype {
    let Some(node) = tree.into_block() else {
        return Datatype::from_tag(LEAF);
    };
    let (reuse, [left, right]) = reuse_match(node, [0, 1], ctx);
    let left = mirror(Datatype::from_boxed(left), ctx).into_boxed();
    let right = mirror(Datatype::from_boxed(right), ctx).into_boxed();
    Datatype::from_block(Block::new_at(reuse, NODE, [right, left], ctx))
}

/// Counts the nodes of a tree, consuming it.
fn check(tree: Datatype, ctx: &mut Context) -> u64 {
    let Some(node) = tree.into_block() else {
        return 1;
    };
    let [left, right] = drop_match(node, [0, 1], ctx);
    1 + check(Datatype::from_boxed(left), ctx) + check(Datatype::from_boxed(right), ctx)
}

fn run_trees(max_depth: u32, config: RuntimeConfig) {
    let mut ctx = Context::with_config(config);
    let max_depth = max_depth.max(MIN_DEPTH + 2);

    let stretch = make(max_depth + 1, &mut ctx);
    println!(
        "stretch tree of depth {}\t check: {}",
        max_depth + 1,
        check(stretch, &mut ctx)
    );

    let long_lived = make(max_depth, &mut ctx);
    for depth in (MIN_DEPTH..=max_depth).step_by(2) {
        let iterations = 1u64 << (max_depth - depth + MIN_DEPTH);
        let allocations = ctx.heap().stats().allocations;
        let mut total = 0;
        for _ in 0..iterations {
            let tree = make(depth, &mut ctx);
            let tree = mirror(tree, &mut ctx);
            total += check(tree, &mut ctx);
        }
        let allocated = ctx.heap().stats().allocations - allocations;
        println!("{iterations}\t trees of depth {depth}\t check: {total}\t allocations: {allocated}");
    }

    // The long-lived tree is still referenced, so mirroring it cannot reuse.
    let mirrored = mirror(long_lived.dup(), &mut ctx);
    let mirrored_nodes = check(mirrored, &mut ctx);
    let nodes = check(long_lived, &mut ctx);
    println!("long lived tree of depth {max_depth}\t check: {nodes}\t mirrored: {mirrored_nodes}");

    match serde_json::to_string_pretty(&ctx.heap().stats()) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: cannot serialize heap statistics: {e}"),
    }
}
