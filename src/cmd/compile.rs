//! Compile command: `unitforge compile <FILES>...`.

use anyhow::{Context, Result, bail};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use unitforge::config::CompilerConfig;
use unitforge::lang::reference_compiler;
use unitforge::listeners::CompletionLatch;
use unitforge::pipeline::TranslationKey;

/// Output and input options of `unitforge compile`.
#[derive(Debug, Default)]
pub struct CompileOptions<'a> {
    pub out_dir: Option<&'a Path>,
    pub encoding: Option<&'a str>,
    pub summary_file: Option<&'a Path>,
}

/// Compile `files` as one session. Returns false when any error was found.
pub async fn cmd_compile(
    config: &CompilerConfig,
    files: &[PathBuf],
    options: &CompileOptions<'_>,
) -> Result<bool> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let compiler = reference_compiler(config)?;
    let latch = CompletionLatch::new();
    compiler.register_compiler_listener(latch.clone());

    for file in files {
        match options.encoding {
            Some(encoding) => compiler.add_file_with_encoding(file, encoding)?,
            None => compiler.add_file(file)?,
        }
    }
    compiler.compile()?;
    latch.wait(1).await;

    if let (Some(path), Some(summary)) = (options.summary_file, compiler.last_summary()) {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    }

    if compiler.has_found_error()? {
        let errors = compiler.errors()?;
        eprintln!("Compilation failed with {} error(s):", errors.len());
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Ok(false);
    }

    let translations = compiler.translations()?;
    match options.out_dir {
        Some(dir) => {
            let names = output_file_names(translations.keys())?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
            for (key, text) in &translations {
                let path = dir.join(&names[key]);
                std::fs::write(&path, text)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("{} -> {}", key, path.display());
            }
        }
        None => {
            for (key, text) in &translations {
                println!("// {}", key);
                println!("{}", text);
            }
        }
    }

    Ok(true)
}

/// `src/main.ts` translated by `php` becomes `main.php`.
fn output_file_name(key: &TranslationKey) -> PathBuf {
    let stem = Path::new(&key.unit)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unit".to_string());
    PathBuf::from(format!("{}.{}", stem, key.translator))
}

/// Output file name of every key; fails when two units share one.
fn output_file_names<'a>(
    keys: impl IntoIterator<Item = &'a TranslationKey>,
) -> Result<BTreeMap<&'a TranslationKey, PathBuf>> {
    let mut owners: HashMap<PathBuf, &TranslationKey> = HashMap::new();
    let mut names = BTreeMap::new();
    for key in keys {
        let name = output_file_name(key);
        if let Some(owner) = owners.insert(name.clone(), key) {
            bail!(
                "Units '{}' and '{}' would both be written to {}",
                owner.unit,
                key.unit,
                name.display()
            );
        }
        names.insert(key, name);
    }
    Ok(names)
}
