//! Entry point templates.

/// Loads `app-<arch>.asar` next to the shim archive.
pub const ASAR_SHIM_TEMPLATE: &str = r#"if (process.arch === 'arm64') {
  process._archPath = require.resolve('../{{arm64}}');
} else {
  process._archPath = require.resolve('../{{x64}}');
}

require(process._archPath);
"#;

/// Points the app at the `app-<arch>` folder next to the shim archive.
pub const LOOSE_SHIM_TEMPLATE: &str = r#"const path = require('path');
const { app } = require('electron');

function setPaths(folder) {
  // Ends in <Name>.app/Contents/Resources/app.asar
  const appPath = app.getAppPath();
  if (path.basename(appPath) === 'app.asar') {
    app.setAppPath(path.join(path.dirname(appPath), folder));
  }
  process._archPath = require.resolve(`../${folder}`);
}

if (process.arch === 'arm64') {
  setPaths('{{arm64}}');
} else {
  setPaths('{{x64}}');
}

require(process._archPath);
"#;
