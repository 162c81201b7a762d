use forge_web::middleware::BoxFuture;
use forge_web::{ConnectionData, Context, Handled, Handler, Response, Server, StatusCode};

struct Counter(usize);

impl ConnectionData for Counter {
    fn new() -> Self {
        Counter(0)
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

struct CountRequests;

impl Handler<Counter> for CountRequests {
    fn call<'a>(
        &'a self,
        counter: &'a mut Counter,
        _: Context<'a>,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            counter.0 += 1;

            resp.status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(format!(r#"{{"count_request": {}}}"#, counter.0))
        })
    }
}

#[tokio::main]
async fn main() {
    let server = Server::<Counter>::builder().handler(CountRequests).build().unwrap();
    server.launch().await.unwrap();
}
