//! `run`, `build`, `check`, `dot`, and `ir`.

use std::path::Path;

use colored::Colorize;
use jac_compiler::program::Program;
use jac_runtime::anchor::AnchorKind;
use jac_runtime::context::ExecutionContext;
use jac_runtime::interp::Interpreter;
use jac_runtime::machine::JacMachine;

use super::{print_diagnostics, require_jac_file};

pub fn run(file: &Path) -> Result<(), String> {
    require_jac_file(file)?;
    let base = file.parent().unwrap_or(Path::new(".")).to_path_buf();
    let machine = JacMachine::new(&base);
    let module = machine
        .import_file(file, Some("__main__"))
        .map_err(|e| render_runtime_error(&e.to_string()))?;

    let ctx = ExecutionContext::create(&base, None).map_err(|e| e.to_string())?;
    let _guard = ctx.enter();
    let mut interp = Interpreter::new(&machine, ctx.clone(), module);
    let result = interp.run_entries(None);
    ctx.close().map_err(|e| e.to_string())?;
    result.map_err(|e| render_runtime_error(&e.to_string()))?;

    for report in &interp.reports {
        println!("{}", interp.value_to_public_json(report));
    }
    Ok(())
}

pub fn build(file: &Path) -> Result<(), String> {
    require_jac_file(file)?;
    let base = file.parent().unwrap_or(Path::new("."));
    let mut program = Program::new(base);
    let bytecode = program.get_bytecode(file, false);
    let errors = print_diagnostics(program.diagnostics.iter());
    if errors > 0 || bytecode.is_none() {
        return Err(format!("build failed with {errors} error(s)"));
    }
    println!("{} {}", "built".green().bold(), file.display());
    Ok(())
}

pub fn check(file: &Path) -> Result<(), String> {
    require_jac_file(file)?;
    let base = file.parent().unwrap_or(Path::new("."));
    let mut program = Program::new(base);
    program.compile(file, true, false);
    let errors = print_diagnostics(program.diagnostics.iter());
    if errors > 0 {
        return Err(format!("check failed with {errors} error(s)"));
    }
    println!("{} {}", "ok".green().bold(), file.display());
    Ok(())
}

pub fn dot(file: &Path) -> Result<(), String> {
    run(file)?;
    let base = file.parent().unwrap_or(Path::new(".")).to_path_buf();
    let ctx = ExecutionContext::create(&base, None).map_err(|e| e.to_string())?;
    let memory = ctx.memory();

    let mut out = String::from("digraph jac {\n");
    for node in memory
        .list_by(Some(AnchorKind::Node), None, None)
        .map_err(|e| e.to_string())?
    {
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\"];\n",
            node.id, node.archetype
        ));
    }
    for edge in memory
        .list_by(Some(AnchorKind::Edge), None, None)
        .map_err(|e| e.to_string())?
    {
        if let Some(endpoints) = edge.edge {
            let attrs = if endpoints.directed { "" } else { " [dir=none]" };
            out.push_str(&format!(
                "  \"{}\" -> \"{}\"{attrs};\n",
                endpoints.src, endpoints.dst
            ));
        }
    }
    out.push_str("}\n");
    println!("{out}");
    Ok(())
}

pub fn ir(kind: &str, file: &Path) -> Result<(), String> {
    require_jac_file(file)?;
    let base = file.parent().unwrap_or(Path::new("."));
    let mut program = Program::new(base);
    let compiled = program
        .compile(file, false, false)
        .ok_or_else(|| format!("cannot compile '{}'", file.display()))?;
    let errors = print_diagnostics(program.diagnostics.iter());
    if errors > 0 {
        return Err(String::new());
    }

    match kind {
        "ast" => println!("{:#?}", compiled.ast),
        "sym" => {
            for symbol in compiled.symbols.iter() {
                println!("{}\t{:?}", symbol.name, symbol.kind);
            }
        }
        "ir" => {
            let image = compiled
                .image
                .as_ref()
                .ok_or_else(|| "no image generated".to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(image).map_err(|e| e.to_string())?
            );
        }
        "unparse" => println!("{}", jac_compiler::unparse(&compiled.ast)),
        other => return Err(format!("unknown ir kind '{other}' (ast|sym|ir|unparse)")),
    }
    Ok(())
}

/// Collapse internal runtime frames the way the tracebacks do.
fn render_runtime_error(message: &str) -> String {
    format!("{message}\n  … [internal runtime calls]")
}
