//! Provisions a fresh environment with a Vite + React + Tailwind skeleton and
//! starts the dev server in the background.
//!
//! Re-running against the same environment rewrites the same files with the
//! same content, so the operation is idempotent.

use super::{join_path, RemoteEnvironment};
use crate::config::SandboxConfig;
use std::time::Duration;

const PACKAGE_JSON: &str = r#"{
  "name": "sandbox-app",
  "version": "1.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite --host",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.2.0",
    "react-dom": "^18.2.0"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.0.0",
    "vite": "^4.3.9",
    "tailwindcss": "^3.3.0",
    "postcss": "^8.4.31",
    "autoprefixer": "^10.4.16"
  }
}
"#;

const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
export default {
  content: [
    "./index.html",
    "./src/**/*.{js,ts,jsx,tsx}",
  ],
  theme: {
    extend: {},
  },
  plugins: [],
}
"#;

const POSTCSS_CONFIG: &str = r#"export default {
  plugins: {
    tailwindcss: {},
    autoprefixer: {},
  },
}
"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Sandbox App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const MAIN_JSX: &str = r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App.jsx'
import './index.css'

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
)
"#;

const APP_JSX: &str = r#"function App() {
  return (
    <div className="min-h-screen bg-gray-900 text-white flex items-center justify-center p-4">
      <div className="text-center max-w-2xl">
        <p className="text-lg text-gray-400">
          Sandbox Ready<br/>
          Start building your React app with Vite and Tailwind CSS!
        </p>
      </div>
    </div>
  )
}

export default App
"#;

const INDEX_CSS: &str = r#"@tailwind base;
@tailwind components;
@tailwind utilities;

* {
  margin: 0;
  padding: 0;
  box-sizing: border-box;
}

body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
  background-color: rgb(17 24 39);
}
"#;

/// Writes the project skeleton and starts the dev server.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    project_dir: String,
    port: u16,
    install_timeout_ms: u64,
    settle_delay: Duration,
}

impl Bootstrapper {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            project_dir: config.project_dir.clone(),
            port: config.dev_server_port,
            install_timeout_ms: config.install_timeout_ms,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        }
    }

    pub fn project_dir(&self) -> &str {
        &self.project_dir
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The fixed skeleton, as `(relative path, content)` pairs.
    pub fn skeleton(&self) -> Vec<(&'static str, String)> {
        vec![
            ("package.json", PACKAGE_JSON.to_string()),
            ("vite.config.js", self.vite_config()),
            ("tailwind.config.js", TAILWIND_CONFIG.to_string()),
            ("postcss.config.js", POSTCSS_CONFIG.to_string()),
            ("index.html", INDEX_HTML.to_string()),
            ("src/main.jsx", MAIN_JSX.to_string()),
            ("src/App.jsx", APP_JSX.to_string()),
            ("src/index.css", INDEX_CSS.to_string()),
        ]
    }

    fn vite_config(&self) -> String {
        format!(
            r#"import {{ defineConfig }} from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({{
  plugins: [react()],
  server: {{
    host: '0.0.0.0',
    port: {port},
    strictPort: true,
    hmr: false,
    allowedHosts: ['.e2b.app', '.e2b.dev', 'localhost', '127.0.0.1']
  }}
}})
"#,
            port = self.port
        )
    }

    /// Provision `env`. Errors mean the environment is unusable; the caller
    /// decides what to do with it. Dev server reachability is not checked.
    pub async fn bootstrap(&self, env: &dyn RemoteEnvironment) -> anyhow::Result<()> {
        let sandbox_id = env.id().to_string();
        tracing::info!("Bootstrapping sandbox {sandbox_id} in {}", self.project_dir);

        for (rel, content) in self.skeleton() {
            let path = join_path(&self.project_dir, rel);
            env.write_file(&path, &content)
                .await
                .map_err(|e| anyhow::anyhow!("failed to write {rel}: {e}"))?;
        }

        let install = env
            .run_command(
                "npm install --legacy-peer-deps",
                &self.project_dir,
                self.install_timeout_ms,
            )
            .await
            .map_err(|e| anyhow::anyhow!("npm install failed: {e}"))?;
        anyhow::ensure!(
            install.success(),
            "npm install exited with {}: {}",
            install.exit_code,
            install.stderr.trim()
        );

        // A previous dev server may still hold the port on re-runs.
        let _ = env
            .run_command("pkill -f vite || true", &self.project_dir, 10_000)
            .await;

        let start = env
            .run_command(
                "nohup npm run dev > /tmp/vite.log 2>&1 &",
                &self.project_dir,
                30_000,
            )
            .await
            .map_err(|e| anyhow::anyhow!("failed to start dev server: {e}"))?;
        anyhow::ensure!(
            start.success(),
            "dev server start exited with {}: {}",
            start.exit_code,
            start.stderr.trim()
        );

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        tracing::info!(
            "Sandbox {sandbox_id} bootstrapped, dev server on port {}",
            self.port
        );
        Ok(())
    }
}
