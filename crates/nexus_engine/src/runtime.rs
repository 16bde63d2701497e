/// Module runtime prepended to every chunk.
///
/// Registration and evaluation are split so chunks can load in any order:
/// `__nexus_register__(id, deps, factory)` only records a module, and the
/// entry chunk's bootstrap call to `__nexus_require__` starts evaluation.
/// The second chunk to load finds the runtime already installed and skips it.
pub const NEXUS_RUNTIME_JS: &str = r#"(function (global) {
  if (global.__nexus_require__) return;

  var registry = {};
  var cache = {};
  var hotState = {};

  function stateOf(id) {
    return hotState[id] || (hotState[id] = { accepted: false, disposers: [], data: {} });
  }

  global.__nexus_register__ = function (id, deps, factory) {
    registry[id] = { deps: deps, factory: factory };
  };

  global.__nexus_require__ = function (id) {
    var cached = cache[id];
    if (cached) return cached.exports;

    var record = registry[id];
    if (!record) throw new Error("[nexus] module not found: " + id);

    var module = {
      id: id,
      exports: {},
      hot: {
        data: stateOf(id).data,
        accept: function () { stateOf(id).accepted = true; },
        dispose: function (callback) { stateOf(id).disposers.push(callback); }
      }
    };
    cache[id] = module;

    function require(specifier) {
      var target = Object.prototype.hasOwnProperty.call(record.deps, specifier)
        ? record.deps[specifier]
        : specifier;
      return global.__nexus_require__(target);
    }

    try {
      record.factory.call(module.exports, require, module, module.exports);
    } catch (err) {
      delete cache[id];
      throw err;
    }

    var exports = module.exports;
    var object = exports !== null && (typeof exports === "object" || typeof exports === "function");
    if (object && !exports.__esModule && !("default" in exports) && Object.isExtensible(exports)) {
      Object.defineProperty(exports, "default", { value: exports, enumerable: false, configurable: true });
    }
    return exports;
  };

  // Returns false when the module cannot take the update in place.
  global.__nexus_apply_update__ = function (id, code) {
    if (!cache[id]) {
      (0, eval)(code);
      return true;
    }
    var state = hotState[id];
    if (!state || !state.accepted) return false;

    var data = {};
    state.disposers.forEach(function (dispose) { dispose(data); });
    hotState[id] = { accepted: false, disposers: [], data: data };
    delete cache[id];
    (0, eval)(code);
    global.__nexus_require__(id);
    return true;
  };
})(typeof window !== "undefined" ? window : globalThis);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_surface() {
        assert!(NEXUS_RUNTIME_JS.contains("if (global.__nexus_require__) return;"));
        assert!(NEXUS_RUNTIME_JS.contains("global.__nexus_register__ = function (id, deps, factory)"));
        assert!(NEXUS_RUNTIME_JS.contains("global.__nexus_apply_update__ = function"));
        assert!(NEXUS_RUNTIME_JS.contains("accept: function"));
        assert!(NEXUS_RUNTIME_JS.contains("dispose: function"));
        assert!(NEXUS_RUNTIME_JS.ends_with('\n'));
    }
}
