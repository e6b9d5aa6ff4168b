use anyhow::{Context, Result};
use clap::Parser;
use cobweb::{build_cpg, writer, CpgOptions};
use std::fs;
use std::path::PathBuf;

/// cobweb — build a code property graph from a WebAssembly module.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Write the graph in Graphviz DOT format to this file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Name for the module vertex (defaults to the input file stem)
    #[arg(long)]
    name: Option<String>,

    /// Skip the control-flow pass; emit only the AST
    #[arg(long)]
    no_cfg: bool,

    /// Give imported functions an empty CFG scaffold
    #[arg(long)]
    include_imports: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let wasm_bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let module_name = cli.name.clone().or_else(|| {
        cli.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    });
    let options = CpgOptions {
        module_name,
        cfg: !cli.no_cfg,
        include_imports_in_cfg: cli.include_imports,
    };

    let cpg = build_cpg(&wasm_bytes, &options)
        .with_context(|| format!("building CPG for {}", cli.input.display()))?;

    log::info!(
        "built graph: {} nodes, {} edges, {} unreachable instructions",
        cpg.graph.node_count(),
        cpg.graph.edge_count(),
        cpg.unreachable.len(),
    );

    if let Some(output_path) = cli.output {
        let mut file = fs::File::create(&output_path)
            .with_context(|| format!("failed to create {}", output_path.display()))?;
        writer::write_dot(&cpg.graph, &mut file)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        log::info!("wrote {}", output_path.display());
    } else {
        println!(
            "{}: {} nodes, {} edges",
            cli.input.display(),
            cpg.graph.node_count(),
            cpg.graph.edge_count(),
        );
    }

    Ok(())
}
