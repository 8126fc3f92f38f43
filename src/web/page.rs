//! Embedded status page
//!
//! One self-contained HTML asset: a live viewer backed by `/stream` plus a
//! small control strip polling `/api/status`.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>camfeed</title>
<style>
  body { font-family: sans-serif; margin: 0; background: #111; color: #ddd; }
  header { padding: 0.6rem 1rem; background: #1b1b1b; display: flex; gap: 1rem; align-items: center; }
  header h1 { font-size: 1.1rem; margin: 0; flex: 1; }
  main { display: flex; justify-content: center; padding: 1rem; }
  img { max-width: 100%; background: #000; }
  button { background: #333; color: #ddd; border: 1px solid #555; padding: 0.3rem 0.8rem; cursor: pointer; }
  button:hover { background: #444; }
  #status { font-size: 0.85rem; color: #9a9; }
</style>
</head>
<body>
<header>
  <h1>camfeed</h1>
  <span id="status">-</span>
  <button onclick="control('start')">Start</button>
  <button onclick="control('stop')">Stop</button>
  <button onclick="control('restart')">Restart</button>
</header>
<main>
  <img src="/stream" alt="camera stream">
</main>
<script>
async function control(op) {
  await fetch('/api/stream/' + op, { method: 'POST' });
  refresh();
}
async function refresh() {
  try {
    const r = await fetch('/api/status');
    const s = await r.json();
    document.getElementById('status').textContent =
      s.state + ' | clients: ' + s.clients +
      (s.placeholder_active ? ' | placeholder' : '');
  } catch (e) {
    document.getElementById('status').textContent = 'unreachable';
  }
}
refresh();
setInterval(refresh, 2000);
</script>
</body>
</html>
"#;
