use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};

mod cli;
mod util;
mod cmd_list;
mod cmd_doctor;
mod cmd_show;
mod cmd_pollard;
mod cmd_tree;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт - info.
    // Пример: RUST_LOG=debug votecache doctor --dir ./voting
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let cfg = util::resolve_config(&cli.common);
    match cli.cmd {
        cli::Cmd::List { json } =>
            cmd_list::exec(&cfg, json),

        cli::Cmd::Doctor { trees, node_trees, json } =>
            cmd_doctor::exec(&cfg, trees, node_trees, json),

        cli::Cmd::Show { block, json } =>
            cmd_show::exec(&cfg, block, json),

        cli::Cmd::Pollard { block, decode } =>
            cmd_pollard::exec(&cfg, block, decode),

        cli::Cmd::Tree { block, node, challenge, json } =>
            cmd_tree::exec(&cfg, block, node, challenge, json),
    }
}
