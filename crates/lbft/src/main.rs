use lbft::Lbft;
use lbft_util_error::WhateverResult;

#[tokio::main]
#[snafu::report]
async fn main() -> WhateverResult<()> {
    Lbft::builder().run().await?;
    Ok(())
}
