use anyhow::Result;
use replay_tools::PluginCatalog;

fn main() -> Result<()> {
    replay_cli::run_main(PluginCatalog::with_builtin_tools())
}
