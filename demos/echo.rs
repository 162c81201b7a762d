use forge_web::middleware::BoxFuture;
use forge_web::{Context, Handled, Handler, Response, Server, StatusCode};
use std::str::from_utf8;

struct Echo;

impl Handler for Echo {
    fn call<'a>(
        &'a self,
        _: &'a mut (),
        ctx: Context<'a>,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            let result = format!(
                r#"{{"url": {:?}, "body": {:?}}}"#,
                from_utf8(ctx.request.url().path()).unwrap_or(""),
                from_utf8(ctx.request.body().unwrap_or(&[])).unwrap_or(""),
            );

            resp.status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(result)
        })
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder().handler(Echo).build().unwrap();
    server.launch().await.unwrap();
}
