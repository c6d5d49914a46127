const CAMERA_STATE_MARKER: &str = "{{camera_state}}";

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="es">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Asistente de visión</title>
  <style>
    body { margin: 0; font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0; }
    main { display: grid; grid-template-columns: minmax(0, 2fr) minmax(280px, 1fr); gap: 1rem; padding: 1rem; }
    .feed img { width: 100%; border-radius: 8px; background: #020617; }
    .feed .state { font-size: 0.9rem; color: #94a3b8; }
    .chat { display: flex; flex-direction: column; gap: 0.5rem; }
    #log { flex: 1; min-height: 320px; overflow-y: auto; background: #1e293b; border-radius: 8px; padding: 0.75rem; }
    #log p { margin: 0 0 0.5rem; white-space: pre-wrap; }
    form { display: flex; gap: 0.5rem; }
    input { flex: 1; padding: 0.5rem; border-radius: 6px; border: 1px solid #334155; background: #0f172a; color: inherit; }
    button { padding: 0.5rem 0.9rem; border-radius: 6px; border: 0; background: #38bdf8; color: #0f172a; cursor: pointer; }
    button.secondary { background: #475569; color: #e2e8f0; }
    .error { color: #fb7185; }
  </style>
</head>
<body>
  <main>
    <section class="feed">
      <img src="/video_feed" alt="Vídeo en directo" />
      <p class="state">Cámara: <span id="camera-state">{{camera_state}}</span></p>
    </section>
    <section class="chat">
      <div id="log"></div>
      <form id="message-form">
        <input id="message" autocomplete="off" placeholder="Escribe un mensaje..." />
        <button type="submit">Enviar</button>
      </form>
      <button id="reset" class="secondary">Nuevo contexto</button>
      <p id="error" class="error"></p>
    </section>
  </main>
  <script>
    const log = document.getElementById("log");
    const error = document.getElementById("error");

    function render(messages) {
      log.replaceChildren(...messages.map((text) => {
        const p = document.createElement("p");
        p.textContent = text;
        return p;
      }));
      log.scrollTop = log.scrollHeight;
    }

    async function refresh() {
      const res = await fetch("/get_conversation");
      const body = await res.json();
      render(body.messages);
      document.getElementById("camera-state").textContent = body.camera_active ? "activa" : "no disponible";
    }

    document.getElementById("message-form").addEventListener("submit", async (event) => {
      event.preventDefault();
      const input = document.getElementById("message");
      error.textContent = "";
      const res = await fetch("/send_message", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ message: input.value }),
      });
      const body = await res.json();
      if (body.status === "success") {
        input.value = "";
        render(body.messages);
      } else {
        error.textContent = body.message;
      }
    });

    document.getElementById("reset").addEventListener("click", async () => {
      const res = await fetch("/new_prompt", { method: "POST" });
      const body = await res.json();
      error.textContent = "";
      render([]);
      log.insertAdjacentHTML("beforeend", "<p><em></em></p>");
      log.lastChild.firstChild.textContent = body.message;
    });

    refresh();
  </script>
</body>
</html>
"#;

/// Render the index page with the current camera state.
pub(crate) fn render_index(camera_active: bool) -> String {
    let state = if camera_active {
        "activa"
    } else {
        "no disponible"
    };
    INDEX_HTML.replace(CAMERA_STATE_MARKER, state)
}
