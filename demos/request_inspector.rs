use forge_web::middleware::BoxFuture;
use forge_web::{Context, Handled, Handler, Response, Server, StatusCode};
use std::str::from_utf8;

struct Inspect;

impl Handler for Inspect {
    fn call<'a>(
        &'a self,
        _: &'a mut (),
        ctx: Context<'a>,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            let req = ctx.request;

            let user_agent = if let Some(value) = req.header(b"user-agent") {
                format!(r#", "user_agent": {:?}"#, from_utf8(value).unwrap_or(""))
            } else {
                String::new()
            };

            let content_type = if let Some(value) = req.header(b"content-type") {
                format!(r#", "content_type": {:?}"#, from_utf8(value).unwrap_or(""))
            } else {
                String::new()
            };

            let result = format!(
                r#"{{"method": "{:?}", "path": {:?}{user_agent}{content_type}, "body": {:?}}}"#,
                req.method(),
                from_utf8(req.url().path()).unwrap_or(""),
                from_utf8(req.body().unwrap_or(&[])).unwrap_or(""),
            );

            resp.status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(result)
        })
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder().handler(Inspect).build().unwrap();
    server.launch().await.unwrap();
}
