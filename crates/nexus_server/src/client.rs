/// Browser side of the hot-update stream, served at [`CLIENT_PATH`].
///
/// Applies each update through the runtime and falls back to a full reload
/// when a module cannot be replaced in place.
///
/// [`CLIENT_PATH`]: crate::CLIENT_PATH
pub const HMR_CLIENT_JS: &str = r#"(function () {
  var source = new EventSource("/__nexus_hmr");

  source.addEventListener("update", function (event) {
    var payload = JSON.parse(event.data);
    var apply = window.__nexus_apply_update__;
    var reload = false;
    payload.updates.forEach(function (update) {
      if (!apply || !apply(update.module_id, update.code)) reload = true;
    });
    if (reload) window.location.reload();
  });

  source.addEventListener("build-error", function (event) {
    console.error("[nexus] " + event.data);
  });
})();
"#;
