//! Withdrawal-credential attestation for freshly deposited validators.

use std::sync::Arc;

use ethers::types::Bytes;

use crate::error::Result;
use crate::proposal::Proposal;
use crate::types::ValidatorStatus;

use super::Service;

pub(crate) async fn vote_withdraw_credentials(srv: Arc<Service>) -> Result<()> {
    let expected: Bytes = srv.node_deposit.withdraw_credentials().call().await?;
    let expected = expected.to_vec();
    let voter = srv.connection.signer_address();

    let mut pubkeys: Vec<Bytes> = Vec::new();
    let mut matched: Vec<bool> = Vec::new();
    {
        let state = srv.state.lock().await;
        for (pubkey, validator) in state
            .validators
            .iter()
            .filter(|(_, v)| v.status == ValidatorStatus::Deposited)
        {
            let id = Proposal::VoteWithdrawCredentials {
                pubkey: pubkey.clone(),
            }
            .id();
            if srv.network_proposal.has_voted(id, voter).call().await? {
                continue;
            }
            pubkeys.push(Bytes::from(pubkey.clone()));
            matched.push(validator.withdrawal_credentials == expected);
        }
    }
    if pubkeys.is_empty() {
        return Ok(());
    }

    tracing::info!(
        token = ?srv.lsd_token,
        count = pubkeys.len(),
        "voting withdraw credentials"
    );
    let opts = srv.connection.lock_and_update_tx_opts().await?;
    let mut call = srv
        .node_deposit
        .vote_withdraw_credentials(pubkeys, matched)
        .gas(opts.gas_limit)
        .gas_price(opts.gas_price);
    call.tx.set_nonce(opts.nonce);
    let pending = call.send().await?;
    let tx_hash = *pending;
    drop(pending);
    tracing::info!(tx = ?tx_hash, "sent voteWithdrawCredentials tx");
    srv.connection.wait_tx_ok(tx_hash).await?;
    drop(opts);
    Ok(())
}
