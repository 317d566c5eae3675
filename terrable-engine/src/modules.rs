//! `require` capability
//!
//! CommonJS loading of `.js` and `.json` files. Relative and absolute
//! specifiers resolve against the requiring module's directory (or the module
//! root for code units); bare specifiers are looked up in
//! `<module root>/node_modules`. The module cache lives inside the context,
//! so every invocation starts with an empty one.

use rquickjs::{Ctx, Exception, Function, Object, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Cannot find module '{0}'")]
    NotFound(String),

    #[error("Cannot read module '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether a resolved file is evaluated as JavaScript or parsed as JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    Script,
    Json,
}

/// A module located on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub path: PathBuf,
    pub format: ModuleFormat,
}

impl ResolvedModule {
    fn new(path: PathBuf) -> Self {
        let format = if path.extension().is_some_and(|ext| ext == "json") {
            ModuleFormat::Json
        } else {
            ModuleFormat::Script
        };
        let path = fs::canonicalize(&path).unwrap_or(path);
        Self { path, format }
    }

    pub fn dirname(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Resolves and reads modules below a root directory
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    root: Arc<PathBuf>,
}

impl ModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    /// Resolve `specifier` as required from `from_dir`
    pub fn resolve(
        &self,
        specifier: &str,
        from_dir: Option<&Path>,
    ) -> Result<ResolvedModule, ModuleError> {
        let not_found = || ModuleError::NotFound(specifier.to_string());

        let relative = specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier == "."
            || specifier == "..";

        if relative {
            let base = from_dir.unwrap_or(&self.root);
            return resolve_path(&base.join(specifier)).ok_or_else(not_found);
        }

        if Path::new(specifier).is_absolute() {
            return resolve_path(Path::new(specifier)).ok_or_else(not_found);
        }

        resolve_path(&self.root.join("node_modules").join(specifier)).ok_or_else(not_found)
    }

    pub fn read(&self, module: &ResolvedModule) -> Result<String, ModuleError> {
        fs::read_to_string(&module.path).map_err(|source| ModuleError::Read {
            path: module.path.clone(),
            source,
        })
    }
}

fn resolve_path(path: &Path) -> Option<ResolvedModule> {
    resolve_file(path).or_else(|| resolve_directory(path))
}

fn resolve_file(path: &Path) -> Option<ResolvedModule> {
    if path.is_file() {
        return Some(ResolvedModule::new(path.to_path_buf()));
    }

    ["js", "json"].iter().find_map(|extension| {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(extension);
        let candidate = PathBuf::from(candidate);
        candidate.is_file().then(|| ResolvedModule::new(candidate))
    })
}

fn resolve_directory(path: &Path) -> Option<ResolvedModule> {
    if !path.is_dir() {
        return None;
    }

    let main = fs::read_to_string(path.join("package.json"))
        .ok()
        .and_then(|manifest| serde_json::from_str::<serde_json::Value>(&manifest).ok())
        .and_then(|manifest| manifest.get("main")?.as_str().map(str::to_string));

    if let Some(main) = main {
        if let Some(module) = resolve_file(&path.join(&main)) {
            return Some(module);
        }
    }

    resolve_file(&path.join("index"))
}

const REQUIRE_FACTORY: &str = r#"
(function (load) {
    var cache = Object.create(null);

    function makeRequire(fromDir) {
        function require(specifier) {
            if (typeof specifier !== "string") {
                throw new TypeError('The "id" argument must be of type string');
            }

            var found = load(specifier, fromDir);
            var cached = cache[found.id];
            if (cached) {
                return cached.exports;
            }

            var module = { id: found.id, filename: found.id, loaded: false, exports: {} };
            cache[found.id] = module;

            try {
                if (found.json) {
                    module.exports = JSON.parse(found.source);
                } else {
                    var wrapper = new Function("exports", "require", "module", "__filename", "__dirname", found.source);
                    wrapper.call(module.exports, module.exports, makeRequire(found.dirname), module, found.id, found.dirname);
                }
            } catch (error) {
                delete cache[found.id];
                throw error;
            }

            module.loaded = true;
            return module.exports;
        }

        require.cache = cache;
        return require;
    }

    return makeRequire(null);
})
"#;

/// Install `require` on the context's global object
pub(crate) fn install<'js>(ctx: &Ctx<'js>, loader: ModuleLoader) -> rquickjs::Result<()> {
    let load = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, specifier: String, from_dir: Option<String>| -> rquickjs::Result<Object<'js>> {
            let from_dir = from_dir.map(PathBuf::from);
            let module = loader
                .resolve(&specifier, from_dir.as_deref())
                .map_err(|error| Exception::throw_message(&ctx, &error.to_string()))?;
            let source = loader
                .read(&module)
                .map_err(|error| Exception::throw_message(&ctx, &error.to_string()))?;

            debug!(specifier = %specifier, path = %module.path.display(), "Loaded module");

            let found = Object::new(ctx.clone())?;
            found.set("id", module.path.display().to_string())?;
            found.set("dirname", module.dirname().display().to_string())?;
            found.set("source", source)?;
            found.set("json", module.format == ModuleFormat::Json)?;
            Ok(found)
        },
    )?;

    let factory: Function<'js> = ctx.eval(REQUIRE_FACTORY)?;
    let require: Value<'js> = factory.call((load,))?;
    ctx.globals().set("require", require)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.js"), "module.exports = 1;").unwrap();
        fs::write(dir.path().join("data.json"), r#"{"answer":42}"#).unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/index.js"), "exports.lib = true;").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/left-pad/dist")).unwrap();
        fs::write(
            dir.path().join("node_modules/left-pad/package.json"),
            r#"{"main":"dist/pad.js"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("node_modules/left-pad/dist/pad.js"),
            "module.exports = function () {};",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_resolve_relative_adds_extension() {
        let dir = fixture();
        let loader = ModuleLoader::new(dir.path());

        let module = loader.resolve("./util", None).unwrap();
        assert!(module.path.ends_with("util.js"));
        assert_eq!(module.format, ModuleFormat::Script);

        let module = loader.resolve("./data.json", None).unwrap();
        assert_eq!(module.format, ModuleFormat::Json);
    }

    #[test]
    fn test_resolve_directory_index() {
        let dir = fixture();
        let loader = ModuleLoader::new(dir.path());

        let module = loader.resolve("./lib", None).unwrap();
        assert!(module.path.ends_with("lib/index.js"));
    }

    #[test]
    fn test_resolve_relative_to_requiring_module() {
        let dir = fixture();
        let loader = ModuleLoader::new("/nonexistent");

        let module = loader.resolve("../util", Some(&dir.path().join("lib"))).unwrap();
        assert!(module.path.ends_with("util.js"));
    }

    #[test]
    fn test_resolve_package_main() {
        let dir = fixture();
        let loader = ModuleLoader::new(dir.path());

        let module = loader.resolve("left-pad", None).unwrap();
        assert!(module.path.ends_with("dist/pad.js"));
    }

    #[test]
    fn test_resolve_missing() {
        let dir = fixture();
        let loader = ModuleLoader::new(dir.path());

        let error = loader.resolve("./missing", None).unwrap_err();
        assert_eq!(error.to_string(), "Cannot find module './missing'");
        assert!(loader.resolve("aws-sdk", None).is_err());
    }
}
