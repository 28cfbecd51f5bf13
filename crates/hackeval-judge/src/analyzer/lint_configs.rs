//! Default linter configurations.
//!
//! The house style is camelCase for functions, variables, CSS classes and
//! HTML ids, PascalCase for classes. The files are written into a per-job
//! directory outside the submission tree and referenced from the preset
//! commands through `$CONFIG_DIR`.

use std::path::Path;

pub const PYLINTRC: &str = ".pylintrc";
pub const FLAKE8_CFG: &str = "flake8.cfg";
pub const ESLINT_CONFIG: &str = "eslint.config.mjs";
pub const HTMLHINT_CONFIG: &str = "htmlhint.json";
pub const STYLELINT_CONFIG: &str = "stylelint.config.json";
pub const CHECKSTYLE_CONFIG: &str = "checkstyle.xml";

/// Linter configuration file names found in submissions. They configure the
/// tools, not the product, so they are never analysed themselves.
pub const IGNORED_FILE_NAMES: &[&str] = &[
    ".pylintrc",
    "eslintconfig.js",
    "eslint.config.js",
    "eslint.config.mjs",
    "eslint.config.cjs",
    ".eslintrc.js",
    ".eslintrc.cjs",
    "htmlhint.config.js",
    ".htmlhintrc",
    "stylelint.config.js",
    "stylelint.config.mjs",
    ".stylelintrc.js",
];

const PYLINTRC_BODY: &str = "\
[BASIC]
function-naming-style=camelCase
variable-naming-style=camelCase
class-naming-style=PascalCase

[REPORTS]
score=no
";

const FLAKE8_BODY: &str = "\
[flake8]
max-line-length = 79
";

const ESLINT_BODY: &str = r#"export default [
    {
        rules: {
            "camelcase": ["error", { "properties": "always" }],
            "no-unused-vars": "warn",
            "no-console": "off",
            "semi": ["error", "always"],
            "quotes": ["error", "single"]
        }
    }
];
"#;

const HTMLHINT_BODY: &str = r#"{
    "id-class-value": "hump"
}
"#;

const STYLELINT_BODY: &str = r#"{
    "rules": {
        "selector-class-pattern": ["^[a-z][a-zA-Z0-9]*$", {
            "message": "Class names must be in camelCase"
        }]
    }
}
"#;

const CHECKSTYLE_BODY: &str = r#"<?xml version="1.0"?>
<!DOCTYPE module PUBLIC
    "-//Checkstyle//DTD Checkstyle Configuration 1.3//EN"
    "https://checkstyle.org/dtds/configuration_1_3.dtd">
<module name="Checker">
    <property name="severity" value="warning"/>
    <module name="TreeWalker">
        <module name="TypeName"/>
        <module name="MethodName"/>
        <module name="LocalVariableName"/>
        <module name="MemberName"/>
        <module name="ParameterName"/>
    </module>
</module>
"#;

/// Write every default configuration into `dir`.
pub fn write_default_configs(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (name, body) in [
        (PYLINTRC, PYLINTRC_BODY),
        (FLAKE8_CFG, FLAKE8_BODY),
        (ESLINT_CONFIG, ESLINT_BODY),
        (HTMLHINT_CONFIG, HTMLHINT_BODY),
        (STYLELINT_CONFIG, STYLELINT_BODY),
        (CHECKSTYLE_CONFIG, CHECKSTYLE_BODY),
    ] {
        std::fs::write(dir.join(name), body)?;
    }
    Ok(())
}

/// Whether `rel_path` should be left out of analysis.
pub fn is_ignored(rel_path: &str) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    name.ends_with(".min.js") || IGNORED_FILE_NAMES.contains(&name)
}
