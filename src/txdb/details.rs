use bitcoin::{Address, Network, Script, Transaction, Txid};

use crate::txdb::records::{Coin, TxRecord, UNCONFIRMED};
use crate::txdb::resolver::Path;

/// One input or output of a transaction as the wallet sees it: the value,
/// the resolved address when the script has one, and the wallet path when
/// the script is ours.
#[derive(Clone, Debug, Default)]
pub struct DetailsMember {
    pub value: i64,
    pub address: Option<Address>,
    pub path: Option<Path>,
}

impl DetailsMember {
    pub fn is_ours(&self) -> bool {
        self.path.is_some()
    }
}

/// Per-transaction projection built alongside the write pipeline and the
/// history queries.
#[derive(Clone, Debug)]
pub struct Details {
    pub hash: Txid,
    pub tx: Transaction,
    pub ps: u32,
    pub height: i32,
    pub block: Option<bitcoin::BlockHash>,
    pub time: u32,
    pub index: i32,
    pub confirmations: u32,
    pub inputs: Vec<DetailsMember>,
    pub outputs: Vec<DetailsMember>,
}

impl Details {
    pub fn from_record(record: &TxRecord, tip_height: u32) -> Self {
        let confirmations = if record.height == UNCONFIRMED {
            0
        } else {
            tip_height.saturating_sub(record.height as u32) + 1
        };

        Self {
            hash: record.hash,
            tx: record.tx.clone(),
            ps: record.ps,
            height: record.height,
            block: record.block,
            time: record.time,
            index: record.index,
            confirmations,
            inputs: vec![DetailsMember::default(); record.tx.input.len()],
            outputs: vec![DetailsMember::default(); record.tx.output.len()],
        }
    }

    pub fn set_input(&mut self, index: usize, path: Option<Path>, coin: &Coin, network: Network) {
        self.inputs[index] = DetailsMember {
            value: coin.value,
            address: address_of(&coin.script, network),
            path,
        };
    }

    pub fn set_output(&mut self, index: usize, path: Option<Path>, network: Network) {
        let output = &self.tx.output[index];
        self.outputs[index] = DetailsMember {
            value: output.value.to_sat() as i64,
            address: address_of(&output.script_pubkey, network),
            path,
        };
    }

    /// Sorted, deduplicated accounts touched by this transaction.
    pub fn accounts(&self) -> Vec<u32> {
        let mut accounts: Vec<u32> = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .filter_map(|member| member.path.map(|path| path.account))
            .collect();

        accounts.sort_unstable();
        accounts.dedup();
        accounts
    }
}

pub(crate) fn address_of(script: &Script, network: Network) -> Option<Address> {
    Address::from_script(script, network).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txdb::records::TxRecord;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, ScriptBuf, TxOut};

    fn record() -> TxRecord {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(1000),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        TxRecord::from_tx(tx, 0)
    }

    #[test]
    fn unconfirmed_has_zero_confirmations() {
        let details = Details::from_record(&record(), 500);
        assert_eq!(details.confirmations, 0);
    }

    #[test]
    fn accounts_are_sorted_and_deduped() {
        let mut details = Details::from_record(&record(), 0);
        details.outputs[0].path = Some(Path {
            account: 7,
            branch: 0,
            index: 0,
        });
        details.inputs = vec![
            DetailsMember {
                value: 0,
                address: None,
                path: Some(Path {
                    account: 7,
                    branch: 1,
                    index: 2,
                }),
            },
            DetailsMember {
                value: 0,
                address: None,
                path: Some(Path {
                    account: 1,
                    branch: 0,
                    index: 0,
                }),
            },
        ];

        assert_eq!(details.accounts(), vec![1, 7]);
    }
}
