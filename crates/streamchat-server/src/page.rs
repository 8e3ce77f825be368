//! Browser client for the demo stream.

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Example Server Sent Event</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 2rem; }
    button { margin-right: 0.5rem; padding: 0.4rem 1rem; }
    #messages div { font-family: monospace; }
  </style>
</head>
<body>
  <h1>Example Server Sent Event</h1>
  <button id="close">Close SSE</button>
  <button id="reconnect" disabled>Reconnect SSE</button>
  <div id="messages">message</div>
  <script>
    const url = "/api/stream";
    const messages = document.getElementById("messages");
    const closeButton = document.getElementById("close");
    const reconnectButton = document.getElementById("reconnect");
    let source = null;

    function setConnected(connected) {
      closeButton.disabled = !connected;
      reconnectButton.disabled = connected;
    }

    function connect() {
      source = new EventSource(url);
      source.onopen = () => setConnected(true);
      source.onmessage = (event) => {
        const line = document.createElement("div");
        line.textContent = event.data;
        messages.appendChild(line);
      };
      source.onerror = () => {
        setConnected(false);
        source.close();
      };
    }

    function close() {
      if (source) {
        source.close();
      }
      setConnected(false);
    }

    closeButton.addEventListener("click", close);
    reconnectButton.addEventListener("click", () => {
      close();
      connect();
    });

    connect();
  </script>
</body>
</html>
"#;
