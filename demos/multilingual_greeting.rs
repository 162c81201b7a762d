use forge_web::middleware::BoxFuture;
use forge_web::{Context, Handled, Handler, Response, Server, StatusCode};

struct Greeting;

impl Handler for Greeting {
    fn call<'a>(
        &'a self,
        _: &'a mut (),
        ctx: Context<'a>,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            let text = match ctx.params.get("lang") {
                Some("en") => r#"{"lang": "en", "text": "Hello, world!"}"#,
                Some("zh") => r#"{"lang": "zh", "text": "你好世界！"}"#,
                Some("es") => r#"{"lang": "es", "text": "¡Hola Mundo!"}"#,
                Some("ar") => r#"{"lang": "ar", "text": "مرحبا بالعالم!"}"#,
                Some("pt") => r#"{"lang": "pt", "text": "Olá, mundo!"}"#,
                Some("hi") => r#"{"lang": "hi", "text": "हैलो वर्ल्ड!"}"#,
                Some("ru") => r#"{"lang": "ru", "text": "Привет, мир!"}"#,
                _ => {
                    return resp
                        .status(StatusCode::NotFound)
                        .header("Content-Type", "application/json")
                        .body(r#"{"error": "Language not supported", "status": "Not Found"}"#)
                }
            };

            resp.status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(text)
        })
    }
}

struct Supported;

impl Handler for Supported {
    fn call<'a>(
        &'a self,
        _: &'a mut (),
        _: Context<'a>,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            resp.status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(r#"{"supported_lang": ["en", "zh", "es", "ar", "pt", "hi", "ru"]}"#)
        })
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder()
        .get("/api", Supported)
        .unwrap()
        .get("/api/{lang}", Greeting)
        .unwrap()
        .build()
        .unwrap();

    server.launch().await.unwrap();
}
