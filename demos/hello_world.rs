use forge_web::middleware::BoxFuture;
use forge_web::{Context, Handled, Handler, Response, Server, StatusCode};

struct HelloWorld;

impl Handler for HelloWorld {
    fn call<'a>(
        &'a self,
        _: &'a mut (),
        _: Context<'a>,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            resp.status(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("Hello, world!")
        })
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder().get("/", HelloWorld).unwrap().build().unwrap();
    server.launch().await.unwrap();
}
