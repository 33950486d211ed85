// Router-level tests against a mocked upstream

mod handlers;
