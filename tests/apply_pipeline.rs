use openlovable::apply::installer::SandboxPackageInstaller;
use openlovable::apply::CodeApplyPipeline;
use openlovable::config::SandboxConfig;
use openlovable::parser::{parse, ParseWarning};
use openlovable::sandbox::memory::InMemoryProvider;
use openlovable::sandbox::{CreateOptions, SandboxLifecycleManager};
use openlovable::state::FileCache;
use std::sync::Arc;

fn setup() -> (Arc<InMemoryProvider>, Arc<SandboxLifecycleManager>, CodeApplyPipeline) {
    let provider = Arc::new(InMemoryProvider::new());
    let manager = Arc::new(SandboxLifecycleManager::new(
        provider.clone(),
        &SandboxConfig {
            settle_delay_ms: 0,
            ..SandboxConfig::default()
        },
        CreateOptions {
            template: "test".into(),
            timeout_ms: 60_000,
        },
    ));
    let pipeline = CodeApplyPipeline::new(
        manager.clone(),
        Arc::new(SandboxPackageInstaller::new(manager.clone(), 60_000)),
        Arc::new(FileCache::new()),
    );
    (provider, manager, pipeline)
}

const RESPONSE: &str = r#"<explanation>Added a hero section.</explanation>
<packages>
framer-motion, react
</packages>
<file path="src/components/Hero.jsx">import { motion } from 'framer-motion'

export default function Hero() {
  return <motion.h1 className="text-5xl">Hello</motion.h1>
}</file>
<file path="src/App.jsx">import Hero from './components/Hero'

export default function App() {
  return <Hero />
}</file>
<file path="src/empty.css"></file>
<structure>src/components/Hero.jsx</structure>"#;

#[tokio::test]
async fn written_files_round_trip_through_the_cache() {
    let (provider, manager, pipeline) = setup();
    manager.create_sandbox().await.unwrap();

    let parsed = parse(RESPONSE);
    let report = pipeline.apply(&parsed, &[], false).await;

    assert!(!report.preview);
    assert!(report.results.errors.is_empty(), "{:?}", report.results.errors);
    assert_eq!(report.explanation, "Added a hero section.");
    assert_eq!(report.structure.as_deref(), Some("src/components/Hero.jsx"));

    let env = &provider.environments()[0];
    for file in &parsed.files {
        let remote = env.file(&format!("/home/user/app/{}", file.path)).unwrap();
        assert_eq!(remote, file.content);
        assert_eq!(pipeline.cache().get(&file.path).unwrap(), file.content);
    }
}

#[tokio::test]
async fn empty_file_is_written() {
    let (provider, manager, pipeline) = setup();
    manager.create_sandbox().await.unwrap();

    let report = pipeline.apply(&parse(RESPONSE), &[], false).await;

    assert!(report.results.files_created.contains(&"src/empty.css".to_string()));
    assert_eq!(
        provider.environments()[0].file("/home/user/app/src/empty.css").as_deref(),
        Some("")
    );
}

#[tokio::test]
async fn declared_packages_are_split_into_installed_and_existing() {
    let (provider, manager, pipeline) = setup();
    manager.create_sandbox().await.unwrap();

    let report = pipeline.apply(&parse(RESPONSE), &[], false).await;

    assert_eq!(report.results.packages_installed, vec!["framer-motion"]);
    assert_eq!(report.results.packages_already_installed, vec!["react"]);

    let install_at = provider.environments()[0]
        .commands()
        .iter()
        .position(|c| c.contains("framer-motion"));
    assert!(install_at.is_some());
}

#[tokio::test]
async fn one_failed_write_does_not_stop_the_batch() {
    let (provider, manager, pipeline) = setup();
    manager.create_sandbox().await.unwrap();
    provider.fail_writes_to("/home/user/app/src/App.jsx");

    let report = pipeline.apply(&parse(RESPONSE), &[], false).await;

    assert_eq!(report.results.errors.len(), 1);
    assert!(report.results.errors[0].contains("src/App.jsx"));
    assert_eq!(
        report.results.files_created,
        vec!["src/components/Hero.jsx", "src/empty.css"]
    );
    // The skeleton version is still what the cache holds.
    assert!(pipeline
        .cache()
        .get("src/App.jsx")
        .unwrap()
        .contains("Sandbox Ready"));
}

#[tokio::test]
async fn truncated_response_is_applied_with_warning() {
    let (provider, manager, pipeline) = setup();
    manager.create_sandbox().await.unwrap();

    let parsed = parse(r#"<file path="src/App.jsx">export default function App() {"#);
    let report = pipeline.apply(&parsed, &[], true).await;

    assert_eq!(
        report.warnings,
        vec![ParseWarning::Truncated {
            path: "src/App.jsx".into()
        }]
    );
    assert_eq!(report.results.files_updated, vec!["src/App.jsx"]);
    assert_eq!(
        provider.environments()[0]
            .file("/home/user/app/src/App.jsx")
            .as_deref(),
        Some("export default function App() {")
    );
}

#[tokio::test]
async fn cache_is_rebuilt_after_sandbox_replacement() {
    let (_provider, manager, pipeline) = setup();
    manager.create_sandbox().await.unwrap();
    pipeline
        .apply(&parse(r#"<file path="src/Extra.jsx">x</file>"#), &[], false)
        .await;
    assert!(pipeline.cache().contains("src/Extra.jsx"));

    manager.create_sandbox().await.unwrap();
    let report = pipeline
        .apply(&parse(r#"<file path="src/Extra.jsx">y</file>"#), &[], false)
        .await;

    assert_eq!(report.results.files_created, vec!["src/Extra.jsx"]);
    assert!(pipeline.cache().is_fresh_for("mem-2"));
}

#[tokio::test]
async fn no_sandbox_means_preview_only() {
    let (provider, _manager, pipeline) = setup();

    let parsed = parse(RESPONSE);
    let report = pipeline.apply(&parsed, &["axios".to_string()], false).await;

    assert!(report.preview);
    assert_eq!(report.results.files_created, parsed.file_paths());
    assert!(report.results.packages_installed.is_empty());
    assert_eq!(provider.remote_calls(), 0);
}
