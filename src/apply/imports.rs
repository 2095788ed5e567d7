//! Package detection from import statements, used when a response declares
//! no packages of its own.

use crate::parser::ParsedFile;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Manifests, lockfiles and tool configs. Their imports are build tooling
/// already present in the skeleton.
const CONFIG_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "tsconfig.json",
    "tsconfig.node.json",
    "jsconfig.json",
    "vite.config.js",
    "vite.config.ts",
    "vite.config.mjs",
    "tailwind.config.js",
    "tailwind.config.ts",
    "tailwind.config.cjs",
    "postcss.config.js",
    "postcss.config.cjs",
    "postcss.config.mjs",
    "next.config.js",
    "next.config.mjs",
    "next.config.ts",
    "eslint.config.js",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.json",
    ".prettierrc",
    ".prettierrc.json",
];

// Statement form: `import x from 'spec'`, `import 'spec'`,
// `export { x } from 'spec'`, anchored at the start of a statement. Only a
// `{ ... }` binding list may span lines. Call form: `import('spec')` and
// `require('spec')`. CSS `@import` is excluded.
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(?:^|;)[ \t]*(?:import|export)[ \t]+(?:[\w$*, \t]*(?:\{[\w\s,$]*\})?[\w$*, \t]*?[ \t]*from[ \t]+)?['"]([^'"\n]+)['"]|(?:^|[^\w$.])(?:require|import)\(\s*['"]([^'"\n]+)['"]\s*\)"#,
    )
    .expect("import regex is valid")
});

pub fn is_config_file(path: &str) -> bool {
    let base = path.rsplit('/').next().unwrap_or(path);
    CONFIG_FILES.contains(&base)
}

/// Package name for an import specifier, or `None` for relative, absolute,
/// aliased (`@/`) and `node:` specifiers.
///
/// `@scope/pkg/sub` maps to `@scope/pkg`; `pkg/sub` maps to `pkg`.
pub fn package_name(specifier: &str) -> Option<String> {
    let specifier = specifier.trim();
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with("@/")
        || specifier.starts_with("node:")
    {
        return None;
    }

    let mut segments = specifier.split('/');
    let first = segments.next()?;
    if first.starts_with('@') {
        let second = segments.next().filter(|s| !s.is_empty())?;
        Some(format!("{first}/{second}"))
    } else {
        Some(first.to_string())
    }
}

/// Every import specifier in `content`, in source order.
pub fn specifiers(content: &str) -> Vec<&str> {
    IMPORT_RE
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str())
        .collect()
}

/// External packages imported by `files`, deduplicated in first-seen order.
pub fn detect_packages(files: &[ParsedFile]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut packages = Vec::new();

    for file in files.iter().filter(|f| !is_config_file(&f.path)) {
        for spec in specifiers(&file.content) {
            if let Some(name) = package_name(spec) {
                if seen.insert(name.clone()) {
                    packages.push(name);
                }
            }
        }
    }

    packages
}
